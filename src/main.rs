use std::net::SocketAddr;
use std::process::exit;

use anyhow::Context;
use clap::{crate_version, App as ClapApp, Arg};
use env_logger::Env;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use visasrv::app::App;
use visasrv::resolver;
use visasrv::visa::{asynced, Instrument, VisaLibrary};

fn main() -> anyhow::Result<()> {
    let matches = ClapApp::new("SCPI-over-TCP bridge")
        .version(crate_version!())
        .about("Forward line-delimited SCPI commands from TCP clients to a VISA instrument")
        .arg(
            Arg::with_name("instrument")
                .required_unless_present("list")
                .help("Substring of the identification string of the instrument to bridge to"),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .short('p')
                .default_value("12345")
                .help("Define the port to listen on."),
        )
        .arg(
            Arg::with_name("visa")
                .long("visa-library")
                .takes_value(true)
                .help("Path to the VISA shared library."),
        )
        .arg(
            Arg::with_name("list")
                .long("list")
                .short('l')
                .help("List connected instruments and exit"),
        )
        .arg(Arg::with_name("verbose").long("verbose").short('v').help("Log verbose output"))
        .get_matches();

    let verbose = matches.is_present("verbose");
    if verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("visasrv=debug")).init();
    } else {
        env_logger::init();
    }

    let port = matches.value_of("port").unwrap().to_string();
    let port = match port.parse::<u16>() {
        Ok(port) => port,
        Err(_) => {
            println!("Cannot parse `{}` as a port number.", port);
            exit(1);
        }
    };

    let visa = VisaLibrary::load(matches.value_of("visa")).context("Failed to load the VISA library")?;
    let manager = visa
        .open_default_manager()
        .context("Failed to open the VISA resource manager")?;

    if matches.is_present("list") {
        let instruments = resolver::list(&manager)?;
        println!("Found {} instrument(s)", instruments.len());
        for (idx, (descriptor, identity)) in instruments.iter().enumerate() {
            match identity {
                Some(identity) => println!("{}: {}, {}", idx + 1, descriptor, identity),
                None => println!("{}: {}, <identification failed>", idx + 1, descriptor),
            }
        }
        return Ok(());
    }

    let key = matches.value_of("instrument").unwrap();
    let descriptor = resolver::resolve(&manager, key)?;
    let instrument = Instrument::open(&manager, &descriptor)
        .with_context(|| format!("Failed to open a session to {}", descriptor))?;
    let instrument = asynced::Instrument::spawn(instrument);

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let addr: SocketAddr = format!("0.0.0.0:{}", port).parse().unwrap();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;
        println!("SCPI bridge listening on {}, forwarding to {}", addr, descriptor);

        let app = App::new(instrument);
        app.serve(listener).await;
        Ok(())
    })
}
