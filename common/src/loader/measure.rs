// Measure fragment schema (`measure.yml`)
//
// measures_config:
//   Weight:
//     standard: KILOGRAM
//     units:
//       GRAM:     { convert: [{ mul: 0.001 }], symbol: g }
//       KILOGRAM: { convert: [{ mul: 1 }],     symbol: kg }
//
// Families may be declared by several modules; later modules extend the
// unit list of an existing family.

use super::deserialize_fragment;
use super::merge::merge_extend;
use crate::errors::ConfigError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMeasureFragment {
    #[serde(default)]
    measures_config: IndexMap<String, RawFamily>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFamily {
    standard: Option<String>,
    #[serde(default)]
    units: IndexMap<String, RawUnit>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUnit {
    symbol: Option<String>,
    #[serde(default)]
    convert: Vec<IndexMap<String, f64>>,
}

/// One arithmetic operation converting a unit value towards the standard unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ConversionOp {
    Add(f64),
    Sub(f64),
    Mul(f64),
    Div(f64),
}

impl ConversionOp {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            ConversionOp::Add(operand) => value + operand,
            ConversionOp::Sub(operand) => value - operand,
            ConversionOp::Mul(operand) => value * operand,
            ConversionOp::Div(operand) => value / operand,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitConfig {
    pub symbol: String,
    pub convert: Vec<ConversionOp>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasureFamily {
    pub standard: String,
    pub units: IndexMap<String, UnitConfig>,
}

/// Merged and validated measure families, in first-declared order
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MeasureConfig {
    pub families: IndexMap<String, MeasureFamily>,
}

/// Parse one module's measure fragment without validating it; validation
/// happens after merging since a fragment may only add units.
pub fn parse_measure_fragment(
    module: &str,
    content: &str,
) -> Result<IndexMap<String, RawFamily>, ConfigError> {
    let raw: RawMeasureFragment = deserialize_fragment(module, content)?;
    Ok(raw.measures_config)
}

/// Merge fragments with extend semantics and validate the result.
///
/// A family already declared keeps its standard unit and unit order; new
/// units are appended and a re-declared unit replaces its body in place.
pub fn merge_measure_fragments(
    fragments: Vec<(String, IndexMap<String, RawFamily>)>,
) -> Result<MeasureConfig, ConfigError> {
    let merged = merge_extend(fragments, |existing: &mut RawFamily, incoming: RawFamily| {
        if existing.standard.is_none() {
            existing.standard = incoming.standard;
        }
        for (unit, body) in incoming.units {
            existing.units.insert(unit, body);
        }
    });

    let mut families = IndexMap::with_capacity(merged.len());
    for (family, raw) in merged {
        let path = format!("measures_config.{}", family);
        families.insert(family, validate_family(raw, &path)?);
    }

    Ok(MeasureConfig { families })
}

fn validate_family(raw: RawFamily, path: &str) -> Result<MeasureFamily, ConfigError> {
    let standard = match raw.standard {
        Some(standard) if !standard.trim().is_empty() => standard,
        _ => {
            return Err(ConfigError::schema(
                format!("{}.standard", path),
                "missing required field",
            ))
        }
    };

    if raw.units.is_empty() {
        return Err(ConfigError::schema(
            format!("{}.units", path),
            "a family needs at least one unit",
        ));
    }
    if !raw.units.contains_key(&standard) {
        return Err(ConfigError::schema(
            format!("{}.standard", path),
            format!("standard unit '{}' is not declared in units", standard),
        ));
    }

    let mut units = IndexMap::with_capacity(raw.units.len());
    for (unit, body) in raw.units {
        let unit_path = format!("{}.units.{}", path, unit);
        let symbol = match body.symbol {
            Some(symbol) if !symbol.is_empty() => symbol,
            _ => {
                return Err(ConfigError::schema(
                    format!("{}.symbol", unit_path),
                    "missing required field",
                ))
            }
        };

        let mut convert = Vec::with_capacity(body.convert.len());
        for (index, operation) in body.convert.into_iter().enumerate() {
            let op_path = format!("{}.convert[{}]", unit_path, index);
            convert.push(parse_operation(operation, &op_path)?);
        }

        units.insert(unit, UnitConfig { symbol, convert });
    }

    Ok(MeasureFamily { standard, units })
}

fn parse_operation(operation: IndexMap<String, f64>, path: &str) -> Result<ConversionOp, ConfigError> {
    if operation.len() != 1 {
        return Err(ConfigError::schema(
            path,
            "a conversion step holds exactly one operation",
        ));
    }
    let (name, operand) = operation
        .into_iter()
        .next()
        .ok_or_else(|| ConfigError::schema(path, "empty conversion step"))?;

    match name.as_str() {
        "add" => Ok(ConversionOp::Add(operand)),
        "sub" => Ok(ConversionOp::Sub(operand)),
        "mul" => Ok(ConversionOp::Mul(operand)),
        "div" if operand == 0.0 => Err(ConfigError::schema(path, "division by zero")),
        "div" => Ok(ConversionOp::Div(operand)),
        other => Err(ConfigError::schema(
            path,
            format!("unknown conversion operation '{}'", other),
        )),
    }
}
