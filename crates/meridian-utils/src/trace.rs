/// Installs a process-wide tracing subscriber driven by `RUST_LOG`.
///
/// Intended for binaries and tests; repeated installs are ignored so test
/// functions can call this unconditionally.
#[inline(never)]
pub fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .compact()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
