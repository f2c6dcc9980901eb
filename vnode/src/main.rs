use netcfg::NodeConfig;
use netstack::config::initialize;
use netstack::NetworkStack;
use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod repl;

/// Pause between polls when no frame moved
const IDLE_WAIT: Duration = Duration::from_millis(1);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // vnode --config <file>
    let args: Vec<String> = env::args().collect();
    let file_path = match args.as_slice() {
        [_, flag, path] if flag == "--config" => path.clone(),
        _ => {
            eprintln!("usage: vnode --config <file>");
            process::exit(2);
        }
    };
    let config_info = match NodeConfig::from_file(&file_path) {
        Ok(config_info) => config_info,
        Err(e) => {
            error!("{file_path}: {e}");
            process::exit(1);
        }
    };
    let stack = match initialize(config_info) {
        Ok(stack) => Arc::new(stack),
        Err(e) => {
            error!("could not start the network stack: {e}");
            process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let pump_handle = {
        let stack = Arc::clone(&stack);
        let running = Arc::clone(&running);
        thread::spawn(move || pump(stack, running))
    };
    repl::Repl::new(Arc::clone(&stack)).run_repl();

    running.store(false, Ordering::Relaxed);
    if pump_handle.join().is_err() {
        error!("packet pump panicked");
    }
    if let Err(e) = stack.shutdown() {
        error!("shutdown: {e}");
    }
}

/// Moves frames between the drivers and the stack until told to stop
fn pump(stack: Arc<NetworkStack>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        match stack.poll() {
            Ok(0) => thread::sleep(IDLE_WAIT),
            Ok(_) => {}
            Err(e) => {
                warn!("poll: {e}");
                thread::sleep(IDLE_WAIT);
            }
        }
    }
}
