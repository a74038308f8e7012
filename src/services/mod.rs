//! Built-in services, one module per service.

pub mod blog;
pub mod calculator;
pub mod greeter;

pub use blog::BlogService;
pub use calculator::CalculatorService;
pub use greeter::GreeterService;
