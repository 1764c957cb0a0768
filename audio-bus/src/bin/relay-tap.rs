use audio_bus::{client, codec::EventKind, demux::DemuxedFrame};

const DEFAULT_SOCKET: &str = "/tmp/media-relay.sock";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SOCKET.to_string());
    let mut reader = client::connect(&path).await?;
    println!("connected to {}", path);

    let mut audio_frames = 0u64;
    let mut audio_bytes = 0u64;
    loop {
        let frame = tokio::select! {
            frame = reader.next_frame() => frame?,
            _ = tokio::signal::ctrl_c() => {
                println!("ctrl+c received");
                break;
            },
        };
        match frame {
            Some(DemuxedFrame::Event(event)) => {
                println!(
                    "event: type: {:?}, session: {}, fields: {}",
                    event.kind,
                    event.session_id,
                    serde_json::Value::Object(event.fields.clone())
                );
                if event.kind != EventKind::Ready {
                    println!("audio: frames: {}, bytes: {}", audio_frames, audio_bytes);
                    audio_frames = 0;
                    audio_bytes = 0;
                }
            }
            Some(DemuxedFrame::Audio(data)) => {
                audio_frames += 1;
                audio_bytes += data.len() as u64;
                if audio_frames % 100 == 1 {
                    println!("audio frame: size: {}, total: {}", data.len(), audio_bytes);
                }
            }
            Some(DemuxedFrame::Malformed { len }) => {
                println!("malformed audio frame: size: {}", len);
            }
            None => {
                println!("relay closed the connection");
                break;
            }
        }
    }

    Ok(())
}
