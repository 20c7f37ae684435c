pub mod audit;
pub mod scope;
pub mod token;
