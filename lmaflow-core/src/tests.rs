mod approval;
mod common;
