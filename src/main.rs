#[macro_use]
extern crate tracing;

use std::env;

use anyhow::Context as _;
use patchpanel::config::bind_addr_from_args;
use patchpanel::{logging, Relay};
use tokio::runtime;

fn main() {
    logging::init();

    match run() {
        Ok(()) => {}
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<()> {
    let addr = bind_addr_from_args(env::args()).context("invalid bind address")?;

    ignore_sigpipe();

    // Single-threaded by design: the relay's correctness depends on there
    // being exactly one task touching its slot tables, ever.
    let rt = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    rt.block_on(async {
        let mut relay = Relay::bind(addr)?;
        relay.run().await
    })
}

/// Rust does not ignore `SIGPIPE` by default the way some runtimes do;
/// without this, a write to a peer that already closed its read side can
/// terminate the process instead of returning an error.
fn ignore_sigpipe() {
    // SAFETY: `signal` with `SIG_IGN` and a valid signal number has no
    // preconditions beyond being called before any conflicting handler is
    // installed, which is the case here at startup.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
