use sigquery::{Computed, StateFields, Store, Tracked};

#[derive(Clone, sigquery::State)]
pub struct Item {
    r#type: String,
    r#ref: u32,
}

fn main() {
    assert_eq!(Item::FIELDS, &["type", "ref"]);
    let store = Store::with_computed(
        Item {
            r#type: "a".into(),
            r#ref: 1,
        },
        Computed::new().derive("len", |t: &Tracked<Item>| t.r#type().len()),
    );
    assert_eq!(store.get().get::<usize>("len"), Some(&1));
    assert_eq!(store.get().get::<u32>("ref"), Some(&1));
}
