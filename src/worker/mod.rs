pub(crate) mod asset;
pub(crate) mod launch;
pub(crate) mod pool;
pub(crate) mod process;
pub(crate) mod protocol;
