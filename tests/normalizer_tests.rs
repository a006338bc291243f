use hermes_gateway::gateway::normalizer::Normalizer;

#[test]
fn test_vendor_prefix_collapses() {
    let normalizer = Normalizer::new();

    // 厂商前缀不影响规范 id
    assert_eq!(
        normalizer.canonical("openai/gpt-4o-mini"),
        normalizer.canonical("gpt-4o-mini")
    );
    assert_eq!(
        normalizer.canonical("models/gemini-1.5-flash"),
        normalizer.canonical("gemini-1.5-flash")
    );
}

#[test]
fn test_case_and_whitespace_are_ignored() {
    let normalizer = Normalizer::new();
    assert_eq!(
        normalizer.canonical("  GPT-4o-Mini  "),
        normalizer.canonical("gpt-4o-mini")
    );
}

#[test]
fn test_normalizing_twice_is_a_noop() {
    let normalizer = Normalizer::new();
    for raw in [
        "openai/GPT-4o-mini",
        "llama3.1:latest",
        "qwen-turbo-2024",
        "claude-3-5-sonnet-20241022",
    ] {
        let once = normalizer.canonical(raw);
        let twice = normalizer.canonical(&once);
        assert_eq!(once, twice, "normalization of {:?} must be idempotent", raw);
    }
}

#[test]
fn test_alias_maps_group_family_variants() {
    let normalizer = Normalizer::new();
    let p1 = vec![
        "gpt-4o-mini".to_string(),
        "openai/gpt-4o-mini".to_string(),
    ];
    let p2 = vec!["gpt-4o-mini-2024-07-18".to_string()];

    let maps = normalizer.build_alias_maps([p1.as_slice(), p2.as_slice()]);

    // 三种写法都要能解析回同一个规范 id
    let canonical = maps.variant_to_canonical.get("gpt-4o-mini").unwrap();
    assert_eq!(
        maps.variant_to_canonical.get("openai/gpt-4o-mini").unwrap(),
        canonical
    );
    assert_eq!(
        maps.variant_to_canonical
            .get("gpt-4o-mini-2024-07-18")
            .unwrap(),
        canonical
    );

    let variants = maps.canonical_to_variants.get(canonical).unwrap();
    assert!(variants.contains("gpt-4o-mini"));
    assert!(variants.contains("openai/gpt-4o-mini"));
    assert!(variants.contains("gpt-4o-mini-2024-07-18"));
}

#[test]
fn test_alias_maps_prefer_highest_version() {
    let normalizer = Normalizer::new();
    let models = vec![
        "llama-v2-chat".to_string(),
        "llama-v3-chat".to_string(),
    ];
    let maps = normalizer.build_alias_maps([models.as_slice()]);

    let canonical = maps.variant_to_canonical.get("llama-v2-chat").unwrap();
    assert!(canonical.contains("v3"), "expected v3 family head, got {}", canonical);
}

#[test]
fn test_table_hash_is_stable_and_content_sensitive() {
    let a = Normalizer::new();
    let b = Normalizer::new();
    assert_eq!(a.table_hash(), b.table_hash());

    let custom = Normalizer::with_tokens(vec!["latest".to_string(), "beta".to_string()]);
    assert_ne!(a.table_hash(), custom.table_hash());
}
