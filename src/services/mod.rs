pub mod admission;
pub mod alias_registry;
pub mod billing;
pub mod cache;
pub mod catalog;
pub mod collaborators;
pub mod drs_service;
pub mod iam;
pub mod passport;
pub mod signers;
