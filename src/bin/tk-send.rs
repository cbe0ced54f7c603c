//! Send frames to a tracker server the way a device would and print the
//! replies.

use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const SAMPLE_LOCATION: &str = "imei:359710049095095,tracker,151006012336,,F,172337.000,A,5105.9792,N,11404.9599,W,0.01,322.56,,0,0,,,";

#[derive(Parser, Debug)]
#[command(name = "tk-send", about = "Send TK103 frames to a tracker server", version)]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:7331")]
    addr: String,

    /// Milliseconds to wait for replies after each frame
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,

    /// Append `;` to every frame
    #[arg(long)]
    terminate: bool,

    /// Frames to send, in order (default: a sample location report)
    frames: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let frames = if args.frames.is_empty() {
        vec![SAMPLE_LOCATION.to_string()]
    } else {
        args.frames.clone()
    };

    let mut stream = TcpStream::connect(&args.addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to connect to {}: {e}", args.addr);
        std::process::exit(1);
    });

    for frame in &frames {
        let mut data = frame.clone().into_bytes();
        if args.terminate {
            data.push(b';');
        }
        if let Err(e) = stream.write_all(&data).await {
            eprintln!("Failed to send: {e}");
            std::process::exit(1);
        }
        println!("> {frame}");

        let wait = Duration::from_millis(args.wait_ms);
        let mut buf = [0u8; 128];
        loop {
            match tokio::time::timeout(wait, stream.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    println!("server closed the connection");
                    return;
                }
                Ok(Ok(n)) => println!("< {}", String::from_utf8_lossy(&buf[..n])),
                Ok(Err(e)) => {
                    eprintln!("Read failed: {e}");
                    std::process::exit(1);
                }
                Err(_) => break,
            }
        }
    }
}
