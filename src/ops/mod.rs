pub mod edit;
pub mod generate;
pub mod mask;
