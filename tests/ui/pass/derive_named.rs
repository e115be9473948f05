use objbridge::prelude::*;

#[derive(Managed)]
#[objbridge(name = "Window", base = "Widget", category = "UI", refcounted)]
pub struct Window {
    native: NativeObject,
    pub title: String,
}

fn main() {
    assert_eq!(Window::type_name(), "Window");
    assert_eq!(Window::base_type_name(), "Widget");
    assert!(Window::is_refcounted());
}
