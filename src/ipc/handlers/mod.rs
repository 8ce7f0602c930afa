pub mod classes;
pub mod components;
pub mod core;
pub mod grades;
pub mod history;
pub mod locks;
pub mod settings;
