use clap::{Parser, Subcommand, ValueEnum};
use std::str::FromStr;

use ledger::{
    ContiguousPool, HogControl, HumanSize, Ledger, LedgerError, OrderPolicy, PhysicalAddress,
    SizeUnit, Written,
};

mod console;
mod stress;

use console::Console;

#[derive(Parser)]
#[command(name = "cmahog")]
#[command(about = "Reserve and release contiguous blocks from an emulated physical pool")]
struct Args {
    /// Which reservation `undo` gives back
    #[arg(long, value_enum)]
    policy: Policy,

    /// Size of the emulated pool, in MiB
    #[arg(long, default_value_t = 1024)]
    pool_size: usize,

    /// Physical base address of the pool (hexadecimal with 0x prefix, or decimal)
    #[arg(long, default_value = "0x100000000", value_parser = parse_address)]
    pool_base: PhysicalAddress,

    /// Unit that reserve counts are given in
    #[arg(long, value_enum, default_value_t = Unit::Mib)]
    unit: Unit,

    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply a sequence of steps in order and print what is left reserved
    Run {
        /// Steps: `reserve=N` (N units, 0 clears), `undo`, or `clear`
        #[arg(required = true)]
        steps: Vec<Step>,
    },
    /// Reserve and undo from many threads at once, then check the books balance
    Stress {
        /// Number of worker threads
        #[arg(short, long, default_value_t = 8)]
        workers: usize,

        /// Reserve/undo rounds per worker
        #[arg(short, long, default_value_t = 1000)]
        rounds: usize,

        /// Largest single reservation, in units
        #[arg(short, long, default_value_t = 16)]
        max_size: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Undo the most recent reservation
    Lifo,
    /// Undo the oldest reservation
    Fifo,
}

impl From<Policy> for OrderPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Lifo => OrderPolicy::Lifo,
            Policy::Fifo => OrderPolicy::Fifo,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Unit {
    B,
    Kib,
    Mib,
    Gib,
}

impl From<Unit> for SizeUnit {
    fn from(unit: Unit) -> Self {
        match unit {
            Unit::B => SizeUnit::Bytes,
            Unit::Kib => SizeUnit::KiB,
            Unit::Mib => SizeUnit::MiB,
            Unit::Gib => SizeUnit::GiB,
        }
    }
}

/// One operator action in a `run` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Reserve(usize),
    Undo,
    Clear,
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undo" => Ok(Step::Undo),
            "clear" => Ok(Step::Clear),
            _ => {
                let count = s
                    .strip_prefix("reserve=")
                    .ok_or_else(|| format!("unknown step `{}`", s))?;
                count
                    .parse()
                    .map(Step::Reserve)
                    .map_err(|e| format!("invalid reserve count `{}`: {}", count, e))
            }
        }
    }
}

fn parse_address(s: &str) -> Result<PhysicalAddress, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(&hex.replace('_', ""), 16),
        None => s.parse(),
    };
    parsed
        .map(PhysicalAddress::new)
        .map_err(|e| format!("invalid address `{}`: {}", s, e))
}

fn build_pool(base: PhysicalAddress, size_mib: usize) -> Result<ContiguousPool, LedgerError> {
    let bytes = SizeUnit::MiB
        .to_nonzero_bytes(size_mib)
        .ok_or(LedgerError::InvalidSize)?;
    if base.checked_add(bytes.get()).is_none() {
        return Err(LedgerError::InvalidSize);
    }
    Ok(ContiguousPool::new(base, bytes.get()))
}

fn run(ledger: &Ledger<&ContiguousPool>, unit: SizeUnit, steps: &[Step]) {
    let control = HogControl::with_unit(ledger, unit);

    for step in steps {
        match *step {
            Step::Reserve(count) => match control.write(count) {
                Ok(Written::Reserved(id)) => println!("reserve {}{}: {}", count, unit, id),
                Ok(Written::Cleared(n)) => println!("reserve 0: cleared {}", n),
                Err(err) => println!("reserve {}{}: {}", count, unit, err),
            },
            Step::Undo => match control.undo() {
                Some(id) => println!("undo: released {}", id),
                None => println!("undo: nothing reserved"),
            },
            Step::Clear => println!("clear: released {}", ledger.release_all()),
        }
    }
}

fn print_summary(ledger: &Ledger<&ContiguousPool>) {
    let pool = *ledger.allocator();
    println!(
        "{} reservations ({}), policy {}",
        ledger.len(),
        HumanSize(ledger.reserved_bytes()),
        ledger.policy()
    );
    for info in ledger.reservations() {
        println!("  {}", info);
    }
    println!(
        "pool: {} total, {} allocated, {} available",
        HumanSize(pool.total_memory()),
        HumanSize(pool.allocated_memory()),
        HumanSize(pool.available_memory())
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    Console::init(Console::level_for(args.verbose))?;

    let pool = build_pool(args.pool_base, args.pool_size)?;
    let ledger = Ledger::new(&pool, args.policy.into());
    let unit = SizeUnit::from(args.unit);
    log::info!(
        "pool {} at {}, policy {}",
        HumanSize(pool.total_memory()),
        args.pool_base,
        ledger.policy()
    );

    match args.command {
        Command::Run { steps } => {
            run(&ledger, unit, &steps);
            print_summary(&ledger);
        }
        Command::Stress {
            workers,
            rounds,
            max_size,
        } => {
            let report = stress::stress(&ledger, unit, workers, rounds, max_size)?;
            println!("{}", report);
            print_summary(&ledger);
        }
    }

    let released = HogControl::with_unit(&ledger, unit).shutdown();
    log::info!("released {} reservations on exit", released);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_steps() {
        assert_eq!("undo".parse(), Ok(Step::Undo));
        assert_eq!("clear".parse(), Ok(Step::Clear));
        assert_eq!("reserve=1024".parse(), Ok(Step::Reserve(1024)));
        assert_eq!("reserve=0".parse(), Ok(Step::Reserve(0)));
        assert!("reserve=-1".parse::<Step>().is_err());
        assert!("grow".parse::<Step>().is_err());
    }

    #[test]
    fn parses_addresses() {
        assert_eq!(
            parse_address("0x1_0000_0000"),
            Ok(PhysicalAddress::new(0x1_0000_0000))
        );
        assert_eq!(parse_address("4096"), Ok(PhysicalAddress::new(4096)));
        assert!(parse_address("0xZZ").is_err());
    }

    #[test]
    fn rejects_empty_or_wrapping_pool() {
        assert!(build_pool(PhysicalAddress::new(0), 0).is_err());
        assert!(build_pool(PhysicalAddress::new(usize::MAX - 10), 1).is_err());
        let pool = build_pool(PhysicalAddress::new(0x1_0000_0000), 4).unwrap();
        assert_eq!(pool.total_memory(), 4 << 20);
    }

    #[test]
    fn run_applies_steps_in_order() {
        let pool = build_pool(PhysicalAddress::new(0x1_0000_0000), 64).unwrap();
        let ledger = Ledger::new(&pool, OrderPolicy::Lifo);

        run(
            &ledger,
            SizeUnit::MiB,
            &[
                Step::Reserve(16),
                Step::Reserve(32),
                Step::Undo,
                Step::Reserve(8),
                Step::Reserve(128),
            ],
        );
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.reserved_bytes(), 24 << 20);

        run(&ledger, SizeUnit::MiB, &[Step::Clear, Step::Undo]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn args_require_policy() {
        assert!(Args::try_parse_from(["cmahog", "run", "undo"]).is_err());
        let args =
            Args::try_parse_from(["cmahog", "--policy", "fifo", "run", "reserve=4", "undo"])
                .unwrap();
        assert_eq!(OrderPolicy::from(args.policy), OrderPolicy::Fifo);
    }
}
