use objbridge::prelude::*;

#[derive(Managed)]
pub struct Sound(#[objbridge(native)] NativeObject, pub f32);

fn main() {
    assert_eq!(Sound::type_name(), "Sound");
    assert_eq!(Sound::category(), None);
}
