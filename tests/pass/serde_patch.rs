use sigquery::{MemoryStorage, PersistOptions, State, Store};

fn same_len(a: &Vec<String>, b: &Vec<String>) -> bool {
    a.len() == b.len()
}

#[derive(Clone, State)]
#[state(serde)]
pub struct Session {
    user: Option<String>,
    #[state(eq = same_len)]
    roles: Vec<String>,
}

fn main() {
    let storage = MemoryStorage::new();
    let store = Store::builder(Session {
        user: None,
        roles: Vec::new(),
    })
    .persist(PersistOptions::new("session", storage.clone(), |s: &Session| {
        SessionPatch {
            user: Some(s.user.clone()),
            roles: None,
        }
    }))
    .build();
    store.merge(SessionPatch {
        user: Some(Some("alice".into())),
        ..Default::default()
    });
    assert_eq!(storage.len(), 1);
}
