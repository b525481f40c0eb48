pub mod circuit_breaker;
pub mod health;
pub mod scheduler;
pub mod webhook;
