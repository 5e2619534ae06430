use crate::config::Config;
use crate::filter::filter_conversations;
use crate::model::Conversation;

fn conversations(names: &[&str]) -> Vec<Conversation> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| Conversation::new(*name, Some(format!("/t/{i}/"))))
        .collect()
}

fn names(conversations: &[Conversation]) -> Vec<&str> {
    conversations.iter().map(|c| c.name.as_str()).collect()
}

#[test]
fn test_scope_all_is_identity() {
    let config = Config::defaults().unwrap();
    let input = conversations(&["Alice Smith", "Bob", "", "alice smith"]);
    let output = filter_conversations(input.clone(), &config);
    assert_eq!(output, input);
}

#[test]
fn test_specific_uses_bidirectional_containment() {
    let config = Config::from_yaml_str(
        "scope: specific\nspecific_conversations:\n  - name: Alice\n",
    )
    .unwrap();
    let output = filter_conversations(
        conversations(&["Alice Smith", "Bob", "Ali", "ALICE", "Malice Group"]),
        &config,
    );
    assert_eq!(names(&output), ["Alice Smith", "Ali", "ALICE", "Malice Group"]);
}

#[test]
fn test_specific_ignores_disabled_rules() {
    let yaml = r#"
scope: specific
specific_conversations:
  - name: Alice
    enabled: false
  - name: Bob
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    let output = filter_conversations(conversations(&["Alice", "Bob Jones"]), &config);
    assert_eq!(names(&output), ["Bob Jones"]);
}

#[test]
fn test_specific_without_rules_fails_open() {
    let config = Config::from_yaml_str("scope: specific\n").unwrap();
    let input = conversations(&["Alice", "Bob"]);
    assert_eq!(filter_conversations(input.clone(), &config), input);

    // only disabled or blank rules behaves the same
    let yaml = r#"
scope: specific
specific_conversations:
  - name: "  "
  - name: Carol
    enabled: false
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    assert_eq!(filter_conversations(input.clone(), &config), input);
}

#[test]
fn test_blank_rule_does_not_match_everything() {
    let yaml = r#"
scope: specific
specific_conversations:
  - name: ""
  - name: Bob
"#;
    let config = Config::from_yaml_str(yaml).unwrap();
    let output = filter_conversations(conversations(&["Alice", "Bob"]), &config);
    assert_eq!(names(&output), ["Bob"]);
}

#[test]
fn test_unknown_scope_passes_through() {
    let config = Config::from_yaml_str("scope: starred\n").unwrap();
    let input = conversations(&["Alice", "Bob"]);
    assert_eq!(filter_conversations(input.clone(), &config), input);
}
