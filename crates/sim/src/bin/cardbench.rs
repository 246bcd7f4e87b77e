//! Bench tool driving the protocol engine against a simulated card
//!
//! Useful to try ATRs, watch the engine's trace output and rehearse glitch
//! sweeps before moving to real hardware.

use cardglitch_core::{
    ApduHeader, Convention, Direction, Negotiation, SessionConfig, StatusWord,
};
use cardglitch_sim::{ApduScript, CardProfile, SimSession, Simulator};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// ATR of the simulated card (hex, logical form)
    #[arg(short, long, default_value = "3B00")]
    atr: String,

    /// The card transmits in inverse convention
    #[arg(short, long)]
    inverse: bool,

    /// The card keeps the ATR rate even if TA1 announces another
    #[arg(long)]
    ignore_ta1: bool,

    /// Card clock frequency in Hz
    #[arg(long, default_value_t = cardglitch_core::config::DEFAULT_CARD_CLOCK_HZ)]
    clock_hz: u32,

    /// Guard time before each transmitted character, in microseconds
    #[arg(long, default_value_t = 520)]
    guard_us: u32,

    /// Per-byte waiting time during exchanges, in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power the card and print its ATR
    Atr,

    /// Send one command
    Apdu {
        /// Five header bytes (hex)
        header: String,

        /// Data sent to the card (hex); without it P3 bytes are read back
        #[arg(short, long)]
        data: Option<String>,

        /// Card response data (hex), returned with 90 00
        #[arg(short, long, default_value = "")]
        response: String,
    },

    /// Sweep glitch widths over a command the card refuses
    Sweep {
        /// First pulse width in timer ticks
        #[arg(long, default_value_t = 1)]
        from: u16,

        /// Last pulse width in timer ticks
        #[arg(long, default_value_t = 64)]
        to: u16,

        /// Lowest width that upsets the simulated card
        #[arg(long, default_value_t = 30)]
        fault_min: u16,

        /// Highest width that upsets the simulated card
        #[arg(long, default_value_t = 33)]
        fault_max: u16,
    },
}

const SW_OK: StatusWord = StatusWord::new(0x90, 0x00);

fn parse_header(text: &str) -> Result<ApduHeader, Box<dyn std::error::Error>> {
    let bytes = hex::decode(text)?;
    let [cla, ins, p1, p2, p3] = bytes[..] else {
        return Err(format!("header must be 5 bytes, got {}", bytes.len()).into());
    };
    Ok(ApduHeader::new(cla, ins, p1, p2, p3))
}

fn start(sim: &Simulator, config: SessionConfig) -> SimSession {
    let mut session = sim.session(config);
    session.power_on();
    session
}

fn print_atr(session: &mut SimSession) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = session.acquire_atr()?;
    println!("ATR: {}", hex::encode_upper(outcome.atr.as_bytes()));
    if !outcome.atr.is_complete() {
        println!(
            "  incomplete: {} of {} bytes",
            outcome.atr.len(),
            outcome.atr.expected_len()
        );
    }
    println!("  convention: {}", session.convention());
    match outcome.negotiation {
        Negotiation::Skipped => println!("  rate: {} baud (no TA1)", session.baud_rate()),
        Negotiation::Applied { params, baud } => println!("  rate: {baud} baud ({params})"),
        Negotiation::Failed(err) => {
            println!("  rate: {} baud ({err})", session.baud_rate())
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(true)
        .init();

    let cli = Cli::parse();

    let convention = if cli.inverse {
        Convention::Inverse
    } else {
        Convention::Direct
    };
    let mut profile =
        CardProfile::new(convention, hex::decode(&cli.atr)?).with_clock_hz(cli.clock_hz);
    if cli.ignore_ta1 {
        profile = profile.ignoring_ta1();
    }
    let config = SessionConfig::default()
        .with_card_clock_hz(cli.clock_hz)
        .with_guard_time_us(cli.guard_us)
        .with_apdu_timeout_ms(cli.timeout_ms);
    let timeout_ms = config.apdu_timeout_ms;

    match cli.command {
        Commands::Atr => {
            let sim = Simulator::new(profile);
            let mut session = start(&sim, config);
            print_atr(&mut session)?;
            session.power_off();
        }

        Commands::Apdu {
            header,
            data,
            response,
        } => {
            let header = parse_header(&header)?;
            let sim = Simulator::new(profile);
            let mut session = start(&sim, config);
            print_atr(&mut session)?;

            let (direction, mut buf) = match data {
                Some(data) => {
                    sim.push_script(ApduScript::accept(header.ins, header.len(), SW_OK));
                    (Direction::Send, hex::decode(data)?)
                }
                None => {
                    let response = hex::decode(response)?;
                    sim.push_script(ApduScript::respond(header.ins, &response, SW_OK));
                    (Direction::Receive, vec![0u8; header.len()])
                }
            };

            let result = session.send_apdu(header, direction, &mut buf, timeout_ms)?;
            println!("> {header}");
            if direction == Direction::Receive {
                println!("< {}", hex::encode_upper(&buf[..result.transferred]));
            }
            println!("< {} ({})", result.status, result.status.description());
            println!("wire: {}", sim.traffic());
            session.power_off();
        }

        Commands::Sweep {
            from,
            to,
            fault_min,
            fault_max,
        } => {
            let refused = StatusWord::new(0x69, 0x82);
            let sim = Simulator::new(profile.with_fault(fault_min..=fault_max, SW_OK));
            let mut session = start(&sim, config);
            print_atr(&mut session)?;

            let verify = ApduHeader::new(0x00, 0x20, 0x00, 0x01, 0x00);
            let mut hits = 0usize;
            for ticks in from..=to {
                sim.push_script(ApduScript::new().status(refused));
                session.trigger();
                session.glitch(ticks);
                let result = session.send_apdu(verify, Direction::Send, &mut [], timeout_ms)?;
                let marker = if result.status == refused {
                    ""
                } else {
                    hits += 1;
                    "  <-- fault"
                };
                println!("{ticks:>5} ticks: {}{marker}", result.status);
            }
            println!("{hits} of {} widths faulted", (from..=to).len());
            session.power_off();
        }
    }

    Ok(())
}
