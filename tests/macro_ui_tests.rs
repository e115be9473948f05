//! Compile tests for `#[derive(Managed)]`.

#[test]
fn derive_pass_cases() {
    let t = trybuild::TestCases::new();
    t.pass("tests/ui/pass/*.rs");
}
