pub(crate) mod pixel;
pub(crate) mod separation;
