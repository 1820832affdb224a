use std::rc::Rc;

use super::*;
use crate::State;

#[derive(Clone, Debug, PartialEq, State)]
struct Profile {
    name: String,
    age: u32,
    #[state(eq = Rc::ptr_eq)]
    tags: Rc<Vec<String>>,
}

fn profile() -> Profile {
    Profile {
        name: "alice".into(),
        age: 30,
        tags: Rc::new(vec!["a".into()]),
    }
}

#[test]
fn derive_lists_fields_in_order() {
    assert_eq!(Profile::FIELDS, &["name", "age", "tags"]);
    assert_eq!(Profile::field_index("age"), Some(1));
    assert_eq!(Profile::field_index("missing"), None);
}

#[test]
fn changed_fields_without_prev_is_all() {
    let p = profile();
    assert_eq!(changed_fields(None, &p), FieldSet::from(["name", "age", "tags"]));
}

#[test]
fn changed_fields_compares_each_field() {
    let prev = profile();
    let mut next = prev.clone();
    next.age = 31;
    assert_eq!(changed_fields(Some(&prev), &next), FieldSet::from(["age"]));
    assert!(changed_fields(Some(&prev), &prev).is_empty());
}

#[test]
fn eq_attribute_overrides_equality() {
    let prev = profile();
    let mut next = prev.clone();
    next.tags = Rc::new(vec!["a".into()]);
    assert_eq!(changed_fields(Some(&prev), &next), FieldSet::from(["tags"]));
}

#[test]
fn apply_patch_overwrites_present_fields() {
    let mut p = profile();
    p.apply_patch(ProfilePatch {
        age: Some(40),
        ..Default::default()
    });
    assert_eq!(p.age, 40);
    assert_eq!(p.name, "alice");
}

#[test]
fn tracked_records_reads() {
    let p = profile();
    let computed = ComputedValues::new();
    let t = Tracked::new(&p, &computed);
    assert_eq!(t.name(), "alice");
    assert_eq!(t.get::<u32>("age"), Some(&30));
    assert_eq!(t.untracked().tags.len(), 1);
    assert_eq!(t.reads(), FieldSet::from(["name", "age"]));
}

#[test]
fn tracked_get_with_wrong_type_is_none() {
    let p = profile();
    let computed = ComputedValues::new();
    let t = Tracked::new(&p, &computed);
    assert_eq!(t.get::<String>("age"), None);
    assert_eq!(t.get::<u32>("missing"), None);
    assert_eq!(t.reads(), FieldSet::from(["age"]));
}
