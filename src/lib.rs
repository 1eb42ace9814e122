//! AgentShield MCP: a transparent security mediator for Model Context
//! Protocol tool-call traffic.
//!
//! This crate is split into a wire codec ([`codec`]), a declarative policy
//! evaluator ([`policy`]) backed by a small glob/regex matcher
//! ([`globmatch`]), three independent content analyzers
//! ([`content_scanner`], [`path_guard`], [`description_scanner`]), the
//! glue that cascades them over a parsed message ([`handler`]), an audit
//! trail ([`audit`]), policy-file loading ([`config`]), and the two
//! transports that embed the handler in a running proxy ([`stdio_proxy`],
//! [`http_proxy`]).

pub mod audit;
pub mod codec;
pub mod config;
pub mod content_scanner;
pub mod description_scanner;
pub mod globmatch;
pub mod handler;
pub mod http_proxy;
pub mod path_guard;
pub mod policy;
pub mod stdio_proxy;
