pub(crate) mod ghostscript;
pub(crate) mod renderer;
pub(crate) mod session;
