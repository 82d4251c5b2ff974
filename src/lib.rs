//! # coldrag
//!
//! A compliance assistant for Terraform plans.
//!
//! coldrag loads a `terraform show -json` plan together with reference
//! documents (frameworks, policies, checklists), indexes them in memory,
//! retrieves the passages most relevant to a compliance question, and asks
//! an LLM for a structured list of violations and recommendations. Around
//! that pipeline sit rule-based security audits, cost estimation, HTML
//! reports, and a small agent/tool dispatcher served over HTTP, WebSocket
//! and MCP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │ plan.json   │──▶│ Chunk+Embed │──▶│ In-memory  │──▶│   LLM    │
//! │ references/ │   │             │   │ MMR index  │   │ + verify │
//! └─────────────┘   └─────────────┘   └────────────┘   └────┬─────┘
//!                                                           │
//!                      ┌────────────────────────────────────┤
//!                      ▼                                    ▼
//!                 ┌──────────┐   ┌──────────────────┐  ┌──────────┐
//!                 │   CLI    │   │ Agents ─▶ Tools  │◀─│   HTTP   │
//!                 │(coldrag) │──▶│ security / cost  │  │ WS + MCP │
//!                 └──────────┘   └──────────────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! coldrag inspect plan.json findings.json --refdir ./frameworks
//! coldrag cost plan.json --format json
//! coldrag report plan.json summary.html --findings findings.json
//! coldrag agents run security_agent audit_security --param plan_json=plan.json
//! coldrag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and env overrides |
//! | [`models`] | Core data types |
//! | [`plan`] | Terraform plan loading |
//! | [`references`] | Reference document loading |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory vector index with MMR retrieval |
//! | [`prompt`] | Prompt template and context assembly |
//! | [`llm`] | Ollama / OpenAI chat models |
//! | [`validate`] | Fence stripping, JSON parsing, violation validation |
//! | [`inspect`] | The end-to-end inspection pipeline |
//! | [`security`] | Rule-based security audit |
//! | [`cost`] | Static and live monthly cost estimates |
//! | [`pricing`] | AWS Pricing API client |
//! | [`report`] | HTML / Markdown / JSON renderers |
//! | [`tools`] | Tool trait and built-in tools |
//! | [`agents`] | Agents, memory and the dispatcher |
//! | [`protocol`] | Request envelopes and sessions |
//! | [`mcp`] | MCP bridge |
//! | [`server`] | HTTP / WebSocket server |
//! | [`progress`] | Stage progress on stderr |

pub mod agents;
pub mod chunk;
pub mod config;
pub mod cost;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod index;
pub mod inspect;
pub mod llm;
pub mod mcp;
pub mod models;
pub mod plan;
pub mod pricing;
pub mod progress;
pub mod prompt;
pub mod protocol;
pub mod references;
pub mod report;
pub mod security;
pub mod server;
pub mod tools;
pub mod validate;
