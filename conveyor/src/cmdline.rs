use clap::{Arg, Command};

pub(super) const ARG_CONSUMER: &str = "consumer";
pub(super) const ARG_PRODUCER: &str = "producer";
pub(super) const ARG_CONFIG: &str = "config";

pub(super) fn root_cli() -> Command {
    Command::new("conveyor")
        .about("Consumes a stream and forwards it into the configured outputs")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_run_subcommand())
}

fn add_run_subcommand() -> Command {
    Command::new("run")
        .about("Runs one consumer forwarding into one producer")
        .arg(
            Arg::new(ARG_CONSUMER)
                .long(ARG_CONSUMER)
                .required(true)
                .help("Name of the consumer under stream.consumer"),
        )
        .arg(
            Arg::new(ARG_PRODUCER)
                .long(ARG_PRODUCER)
                .required(true)
                .help("Name of the producer under stream.producer"),
        )
        .arg(
            Arg::new(ARG_CONFIG)
                .long(ARG_CONFIG)
                .help("JSON config file, CONVEYOR_CONFIG_OBJECT is used when not given"),
        )
}
