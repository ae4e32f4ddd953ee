//! HTTP surface of the JSON API datasource protocol.
//!
//! | route                          | behaviour                                   |
//! |--------------------------------|---------------------------------------------|
//! | `GET /`                        | liveness probe                              |
//! | `POST /metrics`                | metric metadata                             |
//! | `POST /metric-payload-options` | dynamic payload options of a metric         |
//! | `POST /variable`               | values of a dashboard variable              |
//! | `POST /tag-keys`, `/tag-values`| always 501                                  |
//! | `POST /query`                  | series and tables for the requested targets |

pub mod handlers;
pub mod server;

pub use server::{serve, Server, ServerBuilder};
