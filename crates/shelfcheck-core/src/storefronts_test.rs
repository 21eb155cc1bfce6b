use super::*;

const VALID: &str = r#"
storefronts:
  - slug: mercado-norte
    base_url: https://www.mercadonorte.example/
    sales_channels:
      - id: "1"
        currency: BRL
        locale: pt-BR
        country: BRA
  - slug: farmacia-sul
    base_url: https://farmaciasul.example
    enabled: false
    fulfillment_mode: pickup
    availability_rule: line_item
    sales_channels:
      - id: "2"
        currency: BRL
        locale: pt-BR
        country: BRA
"#;

#[test]
fn parses_valid_registry_with_defaults() {
    let file = parse_storefronts(VALID).unwrap();
    assert_eq!(file.storefronts.len(), 2);

    let first = &file.storefronts[0];
    assert!(first.enabled, "enabled defaults to true");
    assert_eq!(first.fulfillment_mode, FulfillmentMode::Auto);
    assert_eq!(first.availability_rule, AvailabilityRule::Strict);
    assert_eq!(first.origin(), "https://www.mercadonorte.example");

    let second = &file.storefronts[1];
    assert!(!second.enabled);
    assert_eq!(second.fulfillment_mode, FulfillmentMode::Pickup);
    assert_eq!(second.availability_rule, AvailabilityRule::LineItem);
}

#[test]
fn enabled_filters_disabled_and_by_slug() {
    let file = parse_storefronts(VALID).unwrap();
    let all = file.enabled(None);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].slug, "mercado-norte");

    assert!(file.enabled(Some("farmacia-sul")).is_empty());
    assert_eq!(file.enabled(Some("mercado-norte")).len(), 1);
}

#[test]
fn rejects_duplicate_slugs() {
    let yaml = r#"
storefronts:
  - slug: a
    base_url: https://a.example
    sales_channels: [{ id: "1", currency: BRL, locale: pt-BR, country: BRA }]
  - slug: A
    base_url: https://b.example
    sales_channels: [{ id: "1", currency: BRL, locale: pt-BR, country: BRA }]
"#;
    let err = parse_storefronts(yaml).unwrap_err();
    assert!(
        matches!(err, ConfigError::Validation(ref m) if m.contains("duplicate")),
        "got: {err:?}"
    );
}

#[test]
fn rejects_missing_sales_channels() {
    let yaml = r"
storefronts:
  - slug: a
    base_url: https://a.example
    sales_channels: []
";
    let err = parse_storefronts(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("sales channel")));
}

#[test]
fn rejects_base_url_without_scheme() {
    let yaml = r#"
storefronts:
  - slug: a
    base_url: a.example
    sales_channels: [{ id: "1", currency: BRL, locale: pt-BR, country: BRA }]
"#;
    let err = parse_storefronts(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("base_url")));
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let err = parse_storefronts("storefronts: [").unwrap_err();
    assert!(matches!(err, ConfigError::StorefrontsFileParse(_)));
}

#[test]
fn load_storefronts_reports_missing_file() {
    let err = load_storefronts(Path::new("/nonexistent/storefronts.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::StorefrontsFileIo { .. }));
}

#[test]
fn channel_lookup_by_id() {
    let file = parse_storefronts(VALID).unwrap();
    let storefront = &file.storefronts[0];
    assert_eq!(storefront.channel("1").map(|c| c.currency.as_str()), Some("BRL"));
    assert!(storefront.channel("9").is_none());
}

#[test]
fn shipped_registry_is_valid() {
    let file = parse_storefronts(include_str!("../../../config/storefronts.yaml")).unwrap();
    let enabled = file.enabled(None);
    assert_eq!(enabled.len(), 2);
    assert!(enabled.iter().all(|s| !s.sales_channels.is_empty()));
}
