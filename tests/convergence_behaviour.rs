//! Behavioural scenarios for instance convergence.

mod convergence;
