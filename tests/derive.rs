#[test]
fn derive_state_pass() {
    let t = trybuild::TestCases::new();
    t.pass("tests/pass/*.rs");
}
