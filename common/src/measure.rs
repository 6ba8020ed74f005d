// Unit-of-measure lookups over the merged measure configuration

use crate::errors::MeasureError;
use crate::loader::{MeasureConfig, MeasureFamily};

/// Read-only access to measure families
#[derive(Debug, Clone, Default)]
pub struct MeasureManager {
    config: MeasureConfig,
}

impl MeasureManager {
    pub fn new(config: MeasureConfig) -> Self {
        Self { config }
    }

    pub fn families(&self) -> Vec<&str> {
        self.config.families.keys().map(String::as_str).collect()
    }

    /// Unit symbols of a family, in declaration order
    pub fn unit_symbols_for_family(&self, family: &str) -> Result<Vec<&str>, MeasureError> {
        Ok(self
            .family_config(family)?
            .units
            .values()
            .map(|unit| unit.symbol.as_str())
            .collect())
    }

    pub fn standard_unit_for_family(&self, family: &str) -> Result<&str, MeasureError> {
        Ok(self.family_config(family)?.standard.as_str())
    }

    /// Convert `value` expressed in `unit` to the family's standard unit
    pub fn convert_to_standard(
        &self,
        family: &str,
        unit: &str,
        value: f64,
    ) -> Result<f64, MeasureError> {
        let unit_config = self
            .family_config(family)?
            .units
            .get(unit)
            .ok_or_else(|| MeasureError::UndefinedUnit {
                family: family.to_string(),
                unit: unit.to_string(),
            })?;

        Ok(unit_config
            .convert
            .iter()
            .fold(value, |acc, operation| operation.apply(acc)))
    }

    fn family_config(&self, family: &str) -> Result<&MeasureFamily, MeasureError> {
        self.config
            .families
            .get(family)
            .ok_or_else(|| MeasureError::UndefinedFamily(family.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{ConversionOp, UnitConfig};
    use indexmap::IndexMap;

    fn temperature() -> MeasureManager {
        let mut units = IndexMap::new();
        units.insert(
            "KELVIN".to_string(),
            UnitConfig {
                symbol: "K".to_string(),
                convert: vec![ConversionOp::Mul(1.0)],
            },
        );
        units.insert(
            "CELSIUS".to_string(),
            UnitConfig {
                symbol: "°C".to_string(),
                convert: vec![ConversionOp::Add(273.15)],
            },
        );
        units.insert(
            "FAHRENHEIT".to_string(),
            UnitConfig {
                symbol: "°F".to_string(),
                convert: vec![
                    ConversionOp::Sub(32.0),
                    ConversionOp::Div(1.8),
                    ConversionOp::Add(273.15),
                ],
            },
        );

        let mut families = IndexMap::new();
        families.insert(
            "Temperature".to_string(),
            MeasureFamily {
                standard: "KELVIN".to_string(),
                units,
            },
        );
        MeasureManager::new(MeasureConfig { families })
    }

    #[test]
    fn test_unit_symbols_in_order() {
        let manager = temperature();
        assert_eq!(
            manager.unit_symbols_for_family("Temperature").unwrap(),
            vec!["K", "°C", "°F"]
        );
    }

    #[test]
    fn test_standard_unit() {
        assert_eq!(
            temperature().standard_unit_for_family("Temperature").unwrap(),
            "KELVIN"
        );
    }

    #[test]
    fn test_undefined_family() {
        assert_eq!(
            temperature().standard_unit_for_family("Length"),
            Err(MeasureError::UndefinedFamily("Length".to_string()))
        );
    }

    #[test]
    fn test_conversion_applies_operations_in_order() {
        let manager = temperature();
        let kelvin = manager
            .convert_to_standard("Temperature", "FAHRENHEIT", 212.0)
            .unwrap();
        assert!((kelvin - 373.15).abs() < 1e-9);

        let err = manager
            .convert_to_standard("Temperature", "RANKINE", 1.0)
            .unwrap_err();
        assert!(matches!(err, MeasureError::UndefinedUnit { .. }));
    }
}
