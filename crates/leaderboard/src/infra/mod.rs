pub mod client;

// Mock implementations only available with mock-service feature or debug builds
#[cfg(any(feature = "mock-service", debug_assertions))]
pub mod mock;
