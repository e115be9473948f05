use objbridge::prelude::*;

#[derive(Managed)]
#[objbridge(constructor = Label::create)]
pub struct Label {
    #[objbridge(native)]
    object: NativeObject,
}

impl Label {
    fn create(bridge: &Bridge, context: Handle) -> BridgeResult<Self> {
        Ok(Self {
            object: NativeObject::borrowed::<Self>(bridge, context)?,
        })
    }
}

fn main() {
    assert!(objbridge::TypeRegistration::collected().any(|r| r.name == "Label"));
}
