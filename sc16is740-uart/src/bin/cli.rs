//! Command-line tool for an SC16IS740 attached to a Linux host.
//!
//! The bus comes from a JSON config file (`--config`) or from `--i2c` /
//! `--spi`. `SC16IS740_*` environment variables override the file, and
//! command-line options override both.
//!
//! - `term`: bridge stdin to the UART and the UART to stdout
//! - `dump`: print every register
//! - `send`: write text and wait for it to leave the FIFO

#[cfg(target_os = "linux")]
mod app {
    use std::path::PathBuf;
    use std::time::Duration;

    use anyhow::{bail, Context, Result};
    use clap::{Parser, Subcommand};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::signal::unix::{self, SignalKind};
    use tokio::sync::mpsc;
    use tokio::time;
    use tokio_util::sync::CancellationToken;

    use sc16is740_uart::config::{BusConfig, Config, I2cBusConfig, SpiBusConfig, UartConfig};
    use sc16is740_uart::hw_trait::linux::{LinuxI2c, LinuxSpi, SysfsPin};
    use sc16is740_uart::hw_trait::NoPin;
    use sc16is740_uart::peripheral::sc16is740::registers;
    use sc16is740_uart::tracing::{self, prelude::*};
    use sc16is740_uart::{
        BufferedUart, I2cTransport, LineOptions, RegisterTransport, SpiTransport,
    };

    type Uart = BufferedUart<Box<dyn RegisterTransport>>;

    const REGISTER_NAMES: [&str; 16] = [
        "RHR/THR", "IER", "IIR/FCR", "LCR", "MCR", "LSR", "MSR", "SPR", "TXLVL", "RXLVL",
        "IODIR", "IOSTATE", "IOINTENA", "reserved", "IOCONTROL", "EFCR",
    ];

    #[derive(Parser)]
    #[command(name = "sc16is740-cli", version, about = "SC16IS740 UART bridge tool")]
    struct Cli {
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// I2C adapter, e.g. /dev/i2c-1
        #[arg(long, conflicts_with = "spi")]
        i2c: Option<PathBuf>,

        /// A0/A1 jumper setting (0-3) or 7-bit address
        #[arg(long, value_parser = parse_u8)]
        address: Option<u8>,

        /// spidev device, e.g. /dev/spidev0.0
        #[arg(long)]
        spi: Option<PathBuf>,

        /// Drive chip select from this GPIO instead of the controller
        #[arg(long, requires = "spi")]
        cs_gpio: Option<u32>,

        /// Reconfigure the SPI bus before every transaction
        #[arg(long, requires = "spi")]
        shared: bool,

        #[arg(short, long)]
        baud: Option<u32>,

        /// Line options such as 8N1 or 7E2
        #[arg(short, long)]
        line: Option<LineOptions>,

        /// Drop data instead of waiting when the transmit FIFO is full
        #[arg(long)]
        no_block: bool,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand)]
    enum Command {
        /// Interactive bridge between this terminal and the serial line
        Term,
        /// Print all registers (RHR is skipped so no data is consumed)
        Dump,
        /// Send text, then wait for the transmit FIFO to drain
        Send {
            text: String,
            /// Terminate with CR LF
            #[arg(long)]
            crlf: bool,
        },
    }

    fn parse_u8(s: &str) -> std::result::Result<u8, String> {
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => s.parse(),
        };
        parsed.map_err(|e| format!("{s:?}: {e}"))
    }

    impl Cli {
        fn resolve_config(&self) -> Result<Config> {
            let mut config = match &self.config {
                Some(path) => Config::load_from(path)?,
                None => Config {
                    uart: UartConfig::default(),
                    bus: self.bus_from_flags()?,
                },
            };
            config.apply_env()?;

            match &mut config.bus {
                BusConfig::I2c(i2c) => {
                    if let Some(address) = self.address {
                        i2c.address = address;
                    }
                }
                BusConfig::Spi(spi) => {
                    if self.cs_gpio.is_some() {
                        spi.cs_gpio = self.cs_gpio;
                    }
                    spi.shared |= self.shared;
                }
            }
            if let Some(baud) = self.baud {
                config.uart.baud_rate = baud;
            }
            if let Some(line) = self.line {
                config.uart.line = line;
            }
            if self.no_block {
                config.uart.block_on_overrun = false;
            }
            Ok(config)
        }

        fn bus_from_flags(&self) -> Result<BusConfig> {
            if let Some(device) = &self.i2c {
                return Ok(BusConfig::I2c(I2cBusConfig {
                    device: device.clone(),
                    address: self.address.unwrap_or(0),
                }));
            }
            if let Some(device) = &self.spi {
                let defaults = sc16is740_uart::SpiTransportConfig::default();
                return Ok(BusConfig::Spi(SpiBusConfig {
                    device: device.clone(),
                    cs_gpio: self.cs_gpio,
                    clock_hz: defaults.bus.clock_hz,
                    mode: 0,
                    lsb_first: false,
                    shared: self.shared,
                    settle_us: defaults.settle_delay.as_micros() as u64,
                }));
            }
            bail!("no bus given: use --config, --i2c or --spi");
        }
    }

    fn open_transport(bus: &BusConfig) -> Result<Box<dyn RegisterTransport>> {
        match bus {
            BusConfig::I2c(c) => {
                let i2c = LinuxI2c::open(&c.device)
                    .with_context(|| format!("opening {}", c.device.display()))?;
                let transport = I2cTransport::new(i2c, c.address);
                info!(
                    "Using {} at address 0x{:02X}",
                    c.device.display(),
                    transport.address()
                );
                Ok(Box::new(transport))
            }
            BusConfig::Spi(c) => {
                let config = c.transport_config()?;
                let spi = LinuxSpi::open(&c.device, c.cs_gpio.is_some())
                    .with_context(|| format!("opening {}", c.device.display()))?;
                info!("Using {} ({:?})", c.device.display(), config.bus);
                match c.cs_gpio {
                    Some(number) => {
                        let cs = SysfsPin::export(number)
                            .with_context(|| format!("exporting GPIO {number}"))?;
                        Ok(Box::new(SpiTransport::with_config(spi, cs, config)))
                    }
                    None => Ok(Box::new(SpiTransport::with_config(spi, NoPin, config))),
                }
            }
        }
    }

    pub async fn main() -> Result<()> {
        tracing::init_journald_or_stderr();
        let cli = Cli::parse();
        let config = cli.resolve_config()?;

        let transport = open_transport(&config.bus)?;
        let mut uart = BufferedUart::from_config(transport, &config.uart);
        if !uart.scratch_test().await? {
            bail!("scratch register test failed; check wiring and address");
        }
        uart.begin(config.uart.baud_rate, config.uart.line)
            .await
            .context("configuring UART")?;

        match cli.command {
            Command::Term => term(&mut uart).await,
            Command::Dump => dump(&mut uart).await,
            Command::Send { text, crlf } => send(&mut uart, &text, crlf).await,
        }
    }

    async fn term(uart: &mut Uart) -> Result<()> {
        let running = CancellationToken::new();
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(16);

        // Stdin reads are not cancel-safe, so they run on their own task.
        tokio::spawn(async move {
            let mut stdin = tokio::io::stdin();
            let mut buf = [0u8; 256];
            loop {
                match stdin.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if input_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;
        let stop = running.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => {},
                _ = sigterm.recv() => {},
            }
            trace!("Signal received, stopping terminal.");
            stop.cancel();
        });

        let mut stdout = tokio::io::stdout();
        let mut output = [0u8; 64];
        let mut poll = time::interval(Duration::from_millis(5));
        info!("Terminal started; Ctrl-C to exit.");

        loop {
            tokio::select! {
                _ = running.cancelled() => break,
                input = input_rx.recv() => {
                    let Some(input) = input else { break };
                    let written = uart.write_bytes(&input).await?;
                    if written < input.len() {
                        warn!(
                            "FIFO full: dropped {} of {} typed bytes",
                            input.len() - written,
                            input.len()
                        );
                    }
                }
                _ = poll.tick() => {
                    while let Some(n) = uart.read_bytes(&mut output).await? {
                        stdout.write_all(&output[..n]).await?;
                    }
                    stdout.flush().await?;
                }
            }
        }

        let lsr = uart.line_status().await?;
        debug!("Terminal stopped, line status {:?}", lsr);
        Ok(())
    }

    async fn dump(uart: &mut Uart) -> Result<()> {
        for (reg, name) in (0u8..).zip(REGISTER_NAMES) {
            if reg == registers::RHR_THR {
                println!("0x{reg:X} {name:<10} --");
                continue;
            }
            let value = uart.read_register(reg).await?;
            println!("0x{reg:X} {name:<10} 0x{value:02X} {value:08b}");
        }
        Ok(())
    }

    async fn send(uart: &mut Uart, text: &str, crlf: bool) -> Result<()> {
        let mut data = text.as_bytes().to_vec();
        if crlf {
            data.extend_from_slice(b"\r\n");
        }
        let written = uart.write_bytes(&data).await?;
        uart.flush().await?;
        if written < data.len() {
            warn!("FIFO full: sent {} of {} bytes", written, data.len());
        }
        info!("Sent {} bytes", written);
        Ok(())
    }
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::main().await
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("sc16is740-cli needs the Linux i2c-dev and spidev interfaces");
    std::process::exit(1);
}
