use mtbo_event_scraper::fetcher::ParserRegistry;
use mtbo_event_scraper::registry::{RegistryError, SourceRegistry};

#[test]
fn test_embedded_sources_resolve() {
    let registry = SourceRegistry::load().unwrap();
    for code in ["SWE", "NOR", "IOF"] {
        let source = registry.resolve(code).unwrap();
        assert_eq!(source.code(), code);
        assert!(source.base_url().starts_with("https://"));
        assert_eq!(source.listing_url(), format!("{}/Events", source.base_url()));
    }
}

#[test]
fn test_unknown_source_lists_known_codes() {
    let registry = SourceRegistry::load_embedded().unwrap();
    match registry.resolve("FIN") {
        Err(RegistryError::NotFound(message)) => assert!(message.contains("IOF, NOR, SWE")),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_relative_detail_urls_resolve_against_base() {
    let registry = SourceRegistry::load_embedded().unwrap();
    let swe = registry.resolve("SWE").unwrap();
    assert_eq!(
        swe.resolve_url("/Events/Show/50597"),
        "https://eventor.orientering.se/Events/Show/50597"
    );
    assert_eq!(
        swe.resolve_url("https://other.example/x"),
        "https://other.example/x"
    );
}

#[test]
fn test_registry_parsers_are_external() {
    let parsers = ParserRegistry::with_builtin();
    let registry = SourceRegistry::load_embedded().unwrap();
    for source in registry.list_all() {
        assert_eq!(source.parser(), "eventor-html");
        assert!(parsers.get(source.parser()).is_none());
    }
    assert!(parsers.get("json").is_some());
}
