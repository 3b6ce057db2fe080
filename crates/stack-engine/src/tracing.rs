//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the `tracing` subscriber used by the CLI.
//! Levels come from `RUST_LOG`; module paths are hidden and spans are shown
//! inline by the compact formatter.
//!
//! ## What Gets Traced
//!
//! - **Graph build**: resolved size and ranks (`debug`)
//! - **Refresh**: resources that vanished out-of-band (`info`)
//! - **Executor steps**: one `step` span per action with `resource` and `op`
//!   fields; creates, updates, deletes and restarts at `info`, retries and
//!   failures at `warn`
//! - **State actor**: startup, every commit with its `serial`, shutdown
//! - **Engine calls**: pulls, file writes and injected faults (`debug`)
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info webapp-stack apply --stack dev
//! RUST_LOG=debug webapp-stack plan --stack prod
//! RUST_LOG=stack_engine::executor=debug,info webapp-stack apply
//! ```
//!
//! A typical `info` apply looks like:
//!
//! ```text
//! INFO Apply started steps=5 workers=4
//! INFO step: Network created resource="webapp-network-dev" id="net-00000001"
//! INFO step: Image pulled resource="redis-image-dev" id="sha256:..." image="redis:7-alpine"
//! INFO step: Created resource="nginx-dev" op=Create id="ctr-00000005"
//! INFO Apply finished succeeded=5 failed=0 blocked=0
//! ```

pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
