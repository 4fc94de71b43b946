//! Concrete implementations of the platform seams.

#[cfg(feature = "app")]
pub mod desktop;
#[cfg(test)]
pub(crate) mod testing;
