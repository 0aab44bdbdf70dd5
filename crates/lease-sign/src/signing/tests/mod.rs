mod common;
mod coordinator;
mod template;
