mod lifecycle_test;
mod support;
