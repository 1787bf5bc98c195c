pub mod run;
pub mod slab;
