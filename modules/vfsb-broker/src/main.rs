//! Entry point (§4.7): read startup configuration, register the broker's
//! task name, then run the dispatcher loop forever.

mod config;
mod dispatch;
mod error;
mod fd;
mod node;
mod task;

use vfsb_kernel::local::LocalBus;
use vfsb_kernel::Pid;

use config::Config;
use dispatch::Broker;

fn main() {
    let config = Config::from_env();
    init_logging(&config.log_level);

    // No real kernel binding is linked into this repo (§6.1, GLOSSARY
    // "Transport" — "production code has no real implementation in this
    // repo, the kernel primitive is an external collaborator"). The broker
    // is driven against an in-process bus here so the binary is
    // self-contained; swapping in a real kernel `Transport` impl is a
    // drop-in replacement of this one call site.
    let bus = LocalBus::new();
    let transport = bus.spawn(Pid(0));

    let mut broker = Broker::new(transport, config.recv_buffer);
    broker
        .register(&config.task_name)
        .expect("task name registration failed, aborting boot (§7)");
    dispatch::log_startup(&config.task_name);

    broker.run();
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level.to_owned());
    env_logger::Builder::from_env(env).init();
}
