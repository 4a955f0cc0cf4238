//! Properties of the synchronization cycle over arbitrary rule sources.

use av_core::ResourceType;
use av_rules::{
    compile_rules, MemoryRuleEngine, Rule, RuleAction, RuleCondition, RuleEngine, RuleSynchronizer, StaticSource,
    SyncConfig, OWNED_RULE_ID_BASE,
};
use proptest::prelude::*;
use serde_json::{json, Value};

fn arb_record() -> impl Strategy<Value = Value> {
    let pattern = prop::sample::select(vec!["ads.example.com", "||doubleclick.net^", "/pagead/", "track.example.org", ""]);
    let types = prop::collection::vec(prop::sample::select(vec!["script", "image", "sub_frame", "ping", "bogus"]), 0..3);
    let action = prop::sample::select(vec!["block", "allow"]);
    (pattern, types, action, any::<bool>()).prop_map(|(pattern, types, action, shorthand)| {
        if shorthand {
            json!({"urlPattern": pattern, "resourceTypes": types, "action": {"type": action}})
        } else {
            json!({"condition": {"urlFilter": pattern, "resourceTypes": types}, "action": {"type": action}})
        }
    })
}

fn arb_source() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_record(), 0..12).prop_map(|records| Value::Array(records).to_string())
}

fn arb_foreign_rules() -> impl Strategy<Value = Vec<Rule>> {
    prop::collection::btree_set(1u32..OWNED_RULE_ID_BASE, 0..6).prop_map(|ids| {
        ids.into_iter()
            .map(|id| Rule {
                id,
                priority: 1,
                condition: RuleCondition {
                    url_filter: format!("||static-{id}.example^"),
                    resource_types: ResourceType::SCRIPT,
                },
                action: RuleAction::Block,
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn synchronize_is_idempotent(source in arb_source(), foreign in arb_foreign_rules()) {
        let engine = MemoryRuleEngine::with_rules(1_000_000, foreign);
        let mut sync = RuleSynchronizer::new(StaticSource::new(source), engine, SyncConfig::default());

        let first = sync.synchronize(true).unwrap();
        let once = sync.engine().installed_rules().unwrap();
        let second = sync.synchronize(true).unwrap();
        let twice = sync.engine().installed_rules().unwrap();

        prop_assert_eq!(first, second);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn foreign_rules_are_never_touched(
        source in arb_source(),
        foreign in arb_foreign_rules(),
        toggles in prop::collection::vec(any::<bool>(), 1..5),
    ) {
        let engine = MemoryRuleEngine::with_rules(1_000_000, foreign.clone());
        let mut sync = RuleSynchronizer::new(StaticSource::new(source), engine, SyncConfig::default());

        for enabled in toggles {
            sync.synchronize(enabled).unwrap();
            let below: Vec<Rule> = sync
                .engine()
                .installed_rules()
                .unwrap()
                .into_iter()
                .filter(|r| r.id < OWNED_RULE_ID_BASE)
                .collect();
            prop_assert_eq!(&below, &foreign);
        }
    }

    #[test]
    fn compiled_rules_are_unique_and_sequential(source in arb_source()) {
        let (rules, stats) = compile_rules(&source, &SyncConfig::default()).unwrap();

        for (offset, rule) in rules.iter().enumerate() {
            prop_assert_eq!(rule.id, OWNED_RULE_ID_BASE + offset as u32);
        }
        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                let same = a.condition.url_filter.eq_ignore_ascii_case(&b.condition.url_filter)
                    && a.condition.resource_types == b.condition.resource_types
                    && a.action == b.action;
                prop_assert!(!same, "duplicate rules {:?} and {:?}", a, b);
            }
        }
        prop_assert_eq!(stats.compiled, stats.parsed - stats.deduped);
    }
}

#[test]
fn duplicate_source_scenario() {
    let source = r#"[{"urlPattern": "ads.example.com"}, {"urlPattern": "ads.example.com"}]"#;
    let mut sync = RuleSynchronizer::new(StaticSource::new(source), MemoryRuleEngine::default(), SyncConfig::default());

    assert_eq!(sync.synchronize(true).unwrap(), 1);
    let installed = sync.engine().installed_rules().unwrap();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].id, OWNED_RULE_ID_BASE);
    assert_eq!(installed[0].condition.url_filter, "ads.example.com");
}
