//! Generated gRPC messages, server and client for `scanagent.ScanAgentService`.

#![allow(missing_docs, clippy::all, clippy::pedantic)]

tonic::include_proto!("scanagent");
