pub mod app;
pub mod canvas;
pub mod components;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;
