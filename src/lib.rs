//! ratewarden - a FinOps control plane for LLM APIs.
//!
//! A reverse proxy that sits in front of upstream model providers and
//! enforces rate limits, hierarchical budgets, and access policy before a
//! call goes out, recording attributed usage after it comes back.

pub mod admission;
pub mod api;
pub mod auth;
pub mod budget;
pub mod cache;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod observability;
pub mod policy;
pub mod provider;
pub mod ratelimit;
pub mod session;
pub mod storage;
pub mod tags;

pub use domain::{GatewayError, Result};
