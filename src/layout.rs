use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::SchemaItem;

const WIDTH_EXTENSION_URL: &str = "http://hl7.org/fhir/uv/sdc/StructureDefinition/sdc-questionnaire-width";

/// Declared width of one table column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnWidthSpec {
  Pixels(f64),
  Percent(f64),
  Unset,
}

impl ColumnWidthSpec {
  /// Parses `"400px"`, `"25%"` or a bare number (pixels). Anything else is
  /// treated as unset.
  pub fn parse(width: Option<&str>) -> Self {
    let Some(raw) = width.map(str::trim).filter(|s| !s.is_empty()) else {
      return ColumnWidthSpec::Unset;
    };
    let parsed = if let Some(n) = raw.strip_suffix('%') {
      n.trim().parse::<f64>().ok().map(ColumnWidthSpec::Percent)
    } else {
      raw
        .strip_suffix("px")
        .unwrap_or(raw)
        .trim()
        .parse::<f64>()
        .ok()
        .map(ColumnWidthSpec::Pixels)
    };
    match parsed {
      Some(spec) if spec.declared_value().is_some_and(|v| v.is_finite() && v >= 0.0) => spec,
      _ => {
        log::warn!("unparseable column width '{raw}'; treating as unset");
        ColumnWidthSpec::Unset
      }
    }
  }

  /// Reads the `sdc-questionnaire-width` extension of a schema item. A
  /// quantity without a unit code is taken as pixels.
  pub fn from_schema_item(item: &SchemaItem) -> Self {
    let quantity = item
      .extension
      .iter()
      .find(|ext| ext.get("url").and_then(Value::as_str) == Some(WIDTH_EXTENSION_URL))
      .and_then(|ext| ext.get("valueQuantity"));
    let Some(value) = quantity.and_then(|q| q.get("value")).and_then(Value::as_f64) else {
      return ColumnWidthSpec::Unset;
    };
    if !value.is_finite() || value < 0.0 {
      log::warn!("column width {value} on '{}' is out of range; treating as unset", item.link_id);
      return ColumnWidthSpec::Unset;
    }
    match quantity.and_then(|q| q.get("code")).and_then(Value::as_str) {
      Some("%") => ColumnWidthSpec::Percent(value),
      Some("px") | None => ColumnWidthSpec::Pixels(value),
      Some(other) => {
        log::warn!(
          "column width unit '{other}' on '{}' is not supported; treating as unset",
          item.link_id
        );
        ColumnWidthSpec::Unset
      }
    }
  }

  fn declared_value(&self) -> Option<f64> {
    match self {
      ColumnWidthSpec::Pixels(v) | ColumnWidthSpec::Percent(v) => Some(*v),
      ColumnWidthSpec::Unset => None,
    }
  }
}

/// Concrete CSS-style width for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedColumnWidth {
  /// `"<n>px"` or `"<n>%"`.
  pub width: String,
  /// False for percentage columns, which keep scaling with the container.
  pub is_fixed: bool,
}

impl ResolvedColumnWidth {
  /// Width in pixels at the given container width.
  pub fn pixels(&self, container_width_px: f64) -> f64 {
    if let Some(pct) = self.width.strip_suffix('%') {
      return pct.parse::<f64>().map(|p| p / 100.0 * container_width_px).unwrap_or(0.0);
    }
    self
      .width
      .strip_suffix("px")
      .and_then(|n| n.parse::<f64>().ok())
      .unwrap_or(0.0)
  }
}

/// Turns declared column widths into concrete widths for a container.
///
/// Pixel and percentage columns keep their declared size. Whatever width is
/// left is split evenly across unset columns; when declared widths already
/// overflow the container, unset columns get zero and the overflow is left to
/// the caller.
pub fn resolve_column_widths(specs: &[ColumnWidthSpec], container_width_px: f64) -> Vec<ResolvedColumnWidth> {
  let container = if container_width_px.is_finite() {
    container_width_px.max(0.0)
  } else {
    0.0
  };

  let mut pixel_sum = 0.0;
  let mut percent_px = 0.0;
  let mut unset = 0usize;
  for spec in specs {
    match spec {
      ColumnWidthSpec::Pixels(px) => pixel_sum += px,
      ColumnWidthSpec::Percent(pct) => percent_px += pct / 100.0 * container,
      ColumnWidthSpec::Unset => unset += 1,
    }
  }

  let remaining = (container - pixel_sum - percent_px).max(0.0);
  let share = if unset > 0 { remaining / unset as f64 } else { 0.0 };

  specs
    .iter()
    .map(|spec| match spec {
      ColumnWidthSpec::Pixels(px) => ResolvedColumnWidth {
        width: format!("{px}px"),
        is_fixed: true,
      },
      ColumnWidthSpec::Percent(pct) => ResolvedColumnWidth {
        width: format!("{pct}%"),
        is_fixed: false,
      },
      ColumnWidthSpec::Unset => ResolvedColumnWidth {
        width: format!("{share}px"),
        is_fixed: true,
      },
    })
    .collect()
}
