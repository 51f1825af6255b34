pub(crate) mod display_format;
