use form_core::{resolve_column_widths, ColumnWidthSpec};

fn main() -> Result<(), String> {
  env_logger::init();
  let mut args = std::env::args().skip(1);
  let container: f64 = args
    .next()
    .ok_or_else(|| "usage: cargo run --example smoke_table -- <container-px> [width ...]".to_string())?
    .parse()
    .map_err(|e| format!("container width: {e}"))?;

  // "-" marks an unset column.
  let specs: Vec<ColumnWidthSpec> = args
    .map(|w| ColumnWidthSpec::parse(Some(w.as_str()).filter(|w| *w != "-")))
    .collect();
  if specs.is_empty() {
    return Err("no columns given".into());
  }

  for (i, w) in resolve_column_widths(&specs, container).iter().enumerate() {
    println!(
      "col{i}: {:<10} fixed={} px={:.1}",
      w.width,
      w.is_fixed,
      w.pixels(container)
    );
  }
  Ok(())
}
