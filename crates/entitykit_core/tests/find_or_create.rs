use entitykit_core::{
    AttributeKind, EntityDescription, FetchRequest, Model, PersistenceStack, Predicate,
    StackConfig, StoreError, Value,
};

fn sample_model() -> Model {
    Model::new(vec![EntityDescription::new("Person")
        .with_attribute("name", AttributeKind::Text)
        .with_attribute("age", AttributeKind::Int)])
    .unwrap()
}

fn open_stack() -> PersistenceStack {
    PersistenceStack::open_in_memory(sample_model(), StackConfig::default()).unwrap()
}

#[test]
fn creates_once_and_is_idempotent_before_save() {
    let mut stack = open_stack();

    let first = stack
        .find_or_create("Person", &[("name", "alice".into())])
        .unwrap();
    let second = stack
        .find_or_create("Person", &[("name", "alice".into())])
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(first.get("name").unwrap(), &Value::Text("alice".into()));

    stack.save().unwrap();
    let all = stack.fetch_all("Person").unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id(), first.id());
}

#[test]
fn is_idempotent_across_saves() {
    let mut stack = open_stack();

    let created = stack
        .find_or_create("Person", &[("name", "bob".into())])
        .unwrap();
    stack.save().unwrap();

    let found = stack
        .find_or_create("Person", &[("name", "bob".into())])
        .unwrap();
    assert_eq!(found.id(), created.id());
    assert!(!stack.has_changes());
}

#[test]
fn lookup_does_not_mutate_existing_entities() {
    let mut stack = open_stack();

    let mut person = stack.create("Person").unwrap();
    person.set("name", "carol").unwrap();
    person.set("age", 44).unwrap();
    stack.update(&person).unwrap();
    stack.save().unwrap();

    let found = stack
        .find_or_create("Person", &[("name", "carol".into())])
        .unwrap();
    assert_eq!(found.id(), person.id());
    assert_eq!(found.get("age").unwrap(), &Value::Int(44));
    assert!(!stack.has_changes());
}

#[test]
fn multiple_pairs_conjoin_equality_constraints() {
    let mut stack = open_stack();

    let young = stack
        .find_or_create("Person", &[("name", "dana".into()), ("age", 20.into())])
        .unwrap();
    let old = stack
        .find_or_create("Person", &[("name", "dana".into()), ("age", 70.into())])
        .unwrap();
    assert_ne!(young.id(), old.id());

    stack.save().unwrap();
    assert_eq!(stack.count(&FetchRequest::all("Person")).unwrap(), 2);
}

#[test]
fn ambiguous_match_returns_first_by_id_and_creates_nothing() {
    let mut stack = open_stack();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let mut person = stack.create("Person").unwrap();
        person.set("name", "dup").unwrap();
        stack.update(&person).unwrap();
        ids.push(person.id());
    }
    stack.save().unwrap();
    ids.sort();

    let found = stack
        .find_or_create("Person", &[("name", "dup".into())])
        .unwrap();
    assert_eq!(found.id(), ids[0]);
    assert!(!stack.has_changes());
    assert_eq!(stack.count(&FetchRequest::all("Person")).unwrap(), 2);
}

#[test]
fn predicate_form_uses_seed_only_on_creation() {
    let mut stack = open_stack();

    let predicate = Predicate::and(vec![
        Predicate::eq("name", "erin"),
        Predicate::ge("age", 18),
    ]);
    let created = stack
        .find_or_create_matching("Person", &predicate, &[("name", "erin".into()), ("age", 21.into())])
        .unwrap();
    assert_eq!(created.get("age").unwrap(), &Value::Int(21));

    let found = stack
        .find_or_create_matching("Person", &predicate, &[("name", "erin".into()), ("age", 99.into())])
        .unwrap();
    assert_eq!(found.id(), created.id());
    assert_eq!(found.get("age").unwrap(), &Value::Int(21));
}

#[test]
fn unknown_key_fails_before_anything_is_created() {
    let mut stack = open_stack();
    let err = stack
        .find_or_create("Person", &[("nickname", "al".into())])
        .unwrap_err();
    assert!(matches!(err, StoreError::Query(_)));
    assert!(!stack.has_changes());
}

#[test]
fn never_commits_on_its_own() {
    let mut stack = open_stack();
    stack
        .find_or_create("Person", &[("name", "frank".into())])
        .unwrap();

    // Visible through the unit-of-work, absent from the store.
    assert_eq!(stack.fetch_all("Person").unwrap().len(), 1);
    let fresh_context = stack.new_context();
    assert!(stack.fetch_all_in(&fresh_context, "Person").unwrap().is_empty());
}

#[test]
fn explicit_target_context_is_isolated_from_the_default_one() {
    let mut stack = open_stack();
    let mut side_context = stack.new_context();

    let side = stack
        .find_or_create_in(&mut side_context, "Person", &[("name", "gus".into())])
        .unwrap();

    assert!(stack.fetch_all("Person").unwrap().is_empty());
    assert_eq!(
        stack.fetch_all_in(&side_context, "Person").unwrap()[0].id(),
        side.id()
    );

    stack.save_in(&mut side_context).unwrap();
    assert_eq!(stack.fetch_all("Person").unwrap().len(), 1);
}
