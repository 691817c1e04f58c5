//! HTTP JSON surface over the metrics tables.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Response bodies that are not engine types
//!
//! Every request recomputes its table from the data source; nothing is cached between requests.
//!
//! | Method | Path | Body |
//! | --- | --- | --- |
//! | GET | `/healthz` | `OK` |
//! | GET | `/api/v1/metrics` | all three tables plus warnings |
//! | GET | `/api/v1/metrics/apis` | API metrics rows |
//! | GET | `/api/v1/metrics/funnel` | funnel rows |
//! | GET | `/api/v1/metrics/regions` | region rows |
//! | GET | `/api/v1/apis` | distinct API names |
//! | POST | `/api/v1/insights/{api_name}` | commentary for one API |

pub mod handlers;
pub mod models;
