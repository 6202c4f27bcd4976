use clap::Parser;
use shared::{
    read_packet, write_packet, Command, LobbyOption, Packet, PlayableCharacter, PlayerInfo,
};
use std::net::TcpStream;
use std::time::Duration;

fn parse_character(value: &str) -> Result<PlayableCharacter, String> {
    match value.to_ascii_lowercase().as_str() {
        "jazz" => Ok(PlayableCharacter::Jazz),
        "spaz" => Ok(PlayableCharacter::Spaz),
        "lori" => Ok(PlayableCharacter::Lori),
        other => Err(format!("unknown character '{}'", other)),
    }
}

/// Headless client that walks through the lobby and prints a few snapshots.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Player name
    #[clap(short, long, default_value = "probe")]
    name: String,
    /// Character to play (jazz, spaz or lori)
    #[clap(short, long, default_value = "jazz", value_parser = parse_character)]
    character: PlayableCharacter,
    /// Game to join or create; any open game when empty
    #[clap(short, long, default_value = "")]
    game: String,
    /// Player slots when creating a game, 0 for the server default
    #[clap(short, long, default_value = "0")]
    max_players: u8,
    /// Snapshots to print before disconnecting
    #[clap(long, default_value = "10")]
    snapshots: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to {}", args.server);
    let mut stream = TcpStream::connect(&args.server)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;

    match read_packet(&mut stream)? {
        Packet::GameList(games) => {
            println!("{} game(s) running", games.len());
            for (name, summary) in &games {
                println!(
                    "  {}: {}/{}{}",
                    name,
                    summary.players,
                    summary.max_players,
                    if summary.has_room() { "" } else { " (full)" }
                );
            }
        }
        other => return Err(format!("expected game list, got {}", other.kind()).into()),
    }

    let mut info = PlayerInfo::new(args.name, args.character).in_game(args.game);
    info.max_players = args.max_players;
    write_packet(
        &mut stream,
        &Packet::LobbyOption {
            option: LobbyOption::RegisterPlayer.into(),
        },
    )?;
    write_packet(&mut stream, &Packet::Register(info))?;

    let player_id = match read_packet(&mut stream)? {
        Packet::PlayerId { player_id } => player_id,
        Packet::Rejected { reason } => {
            println!("Registration rejected: {}", reason);
            return Ok(());
        }
        other => return Err(format!("expected player id, got {}", other.kind()).into()),
    };
    println!("Registered as player {}", player_id);

    let moves = [Command::MoveRight, Command::Jump, Command::Shoot, Command::Idle];
    for i in 0..args.snapshots {
        write_packet(&mut stream, &Packet::Command(moves[i % moves.len()]))?;

        match read_packet(&mut stream)? {
            Packet::Snapshot(snapshot) => {
                println!(
                    "Tick {} ({} players{})",
                    snapshot.tick,
                    snapshot.players.len(),
                    if snapshot.game_over { ", game over" } else { "" }
                );
                for player in &snapshot.players {
                    println!(
                        "  Player {} {}: pos=({:.1}, {:.1}) health={} score={}",
                        player.id, player.name, player.x, player.y, player.health, player.score
                    );
                }
                if snapshot.game_over {
                    break;
                }
            }
            other => println!("Unexpected packet: {}", other.kind()),
        }
    }

    println!("Test client finished");
    Ok(())
}
