pub mod rules;
pub mod socket;
pub mod supervisor;
