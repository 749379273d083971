use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ftpsync_core::{EntryType, FtpClient, FtpConfig, FtpError};
use tempfile::tempdir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct ScriptedServer {
    greeting: Option<String>,
    mlst: bool,
    listings: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<u8>>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedServer {
    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

async fn start(server: ScriptedServer) -> (Arc<ScriptedServer>, FtpConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(server);
    let accepted = Arc::clone(&server);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let server = Arc::clone(&accepted);
            tokio::spawn(async move {
                let _ = serve(server, socket).await;
            });
        }
    });

    let mut config = FtpConfig::new("127.0.0.1", "anonymous", "anonymous@");
    config.port = port;
    config.timeout = Duration::from_secs(5);
    (server, config)
}

async fn serve(server: Arc<ScriptedServer>, socket: TcpStream) -> std::io::Result<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let greeting = server
        .greeting
        .clone()
        .unwrap_or_else(|| "220 test server ready".to_string());
    write.write_all(format!("{greeting}\r\n").as_bytes()).await?;
    if !greeting.starts_with("220") {
        return Ok(());
    }

    let mut passive: Option<TcpListener> = None;
    while let Some(line) = lines.next_line().await? {
        server.commands.lock().unwrap().push(line.clone());
        let (command, arg) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let reply = match command {
            "USER" => "331 Password required".to_string(),
            "PASS" if arg == "anonymous@" => "230 Logged in".to_string(),
            "PASS" => "530 Login incorrect".to_string(),
            "TYPE" => "200 Type set to I".to_string(),
            "FEAT" if server.mlst => "211-Features:\r\n MLST type*;size*;modify*;\r\n UTF8\r\n211 End".to_string(),
            "PASV" => {
                let data = TcpListener::bind("127.0.0.1:0").await?;
                let port = data.local_addr()?.port();
                passive = Some(data);
                format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port / 256,
                    port % 256
                )
            }
            "MLSD" | "LIST" | "RETR" => {
                let Some(data) = passive.take() else {
                    write.write_all(b"425 Use PASV first\r\n").await?;
                    continue;
                };
                let payload = if command == "RETR" {
                    server.files.get(arg).cloned()
                } else {
                    server
                        .listings
                        .get(arg)
                        .map(|lines| format!("{}\r\n", lines.join("\r\n")).into_bytes())
                };
                match payload {
                    Some(bytes) => {
                        write.write_all(b"150 Opening data connection\r\n").await?;
                        let (mut stream, _) = data.accept().await?;
                        stream.write_all(&bytes).await?;
                        stream.shutdown().await?;
                        drop(stream);
                        "226 Transfer complete".to_string()
                    }
                    None => {
                        // Keep the port open so the client's data connect still succeeds.
                        passive = Some(data);
                        "550 No such file or directory".to_string()
                    }
                }
            }
            "QUIT" => {
                write.write_all(b"221 Goodbye\r\n").await?;
                return Ok(());
            }
            _ => "502 Command not implemented".to_string(),
        };
        write.write_all(format!("{reply}\r\n").as_bytes()).await?;
    }
    Ok(())
}

#[tokio::test]
async fn lists_directory_with_mlsd_when_advertised() {
    let (server, config) = start(ScriptedServer {
        mlst: true,
        listings: HashMap::from([(
            "/user".to_string(),
            vec![
                "type=cdir;modify=20240101000000; .".to_string(),
                "type=file;size=5;modify=20240102030405; a.txt".to_string(),
                "type=dir;modify=20240101000000; photos".to_string(),
            ],
        )]),
        ..Default::default()
    })
    .await;

    let mut session = FtpClient::new(config).unwrap().connect().await.unwrap();
    let entries = session.list("/user").await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "a.txt");
    assert_eq!(entries[0].entry_type, EntryType::File);
    assert_eq!(entries[0].size, 5);
    assert!(entries[0].modified.is_some());
    assert_eq!(entries[1].name, "photos");
    assert!(entries[1].is_dir());
    assert!(server.commands().iter().any(|c| c == "MLSD /user"));
    session.close().await;
}

#[tokio::test]
async fn falls_back_to_unix_listing_without_mlst() {
    let (server, config) = start(ScriptedServer {
        listings: HashMap::from([(
            "/".to_string(),
            vec![
                "total 2".to_string(),
                "-rw-r--r-- 1 owner group 12 Jan 15  2021 notes.txt".to_string(),
                "drwxr-xr-x 2 owner group 4096 Jan 15  2021 DCIM".to_string(),
            ],
        )]),
        ..Default::default()
    })
    .await;

    let mut session = FtpClient::new(config).unwrap().connect().await.unwrap();
    let entries = session.list("/").await.unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "notes.txt");
    assert_eq!(entries[0].size, 12);
    assert!(entries[1].is_dir());
    assert!(server.commands().iter().any(|c| c == "LIST /"));
    session.close().await;
}

#[tokio::test]
async fn downloads_file_to_local_path() {
    let (_server, config) = start(ScriptedServer {
        files: HashMap::from([("/user/a.txt".to_string(), b"hello".to_vec())]),
        ..Default::default()
    })
    .await;

    let dir = tempdir().unwrap();
    let target = dir.path().join("a.txt");
    let mut session = FtpClient::new(config).unwrap().connect().await.unwrap();
    let bytes = session.download_to(&target, "/user/a.txt").await.unwrap();

    assert_eq!(bytes, 5);
    assert_eq!(std::fs::read(&target).unwrap(), b"hello");
    session.close().await;
}

#[tokio::test]
async fn missing_remote_file_surfaces_reply_code() {
    let (_server, config) = start(ScriptedServer::default()).await;

    let dir = tempdir().unwrap();
    let target = dir.path().join("nope.bin");
    let mut session = FtpClient::new(config).unwrap().connect().await.unwrap();
    let err = session.download_to(&target, "/nope.bin").await.unwrap_err();

    assert_eq!(err.code(), Some(550));
    assert!(!err.is_too_many_connections());
    session.close().await;
}

#[tokio::test]
async fn refusal_greeting_is_too_many_connections() {
    let (_server, config) = start(ScriptedServer {
        greeting: Some("421 Too many connections (8) from this IP".to_string()),
        ..Default::default()
    })
    .await;

    let err = match FtpClient::new(config).unwrap().connect().await {
        Ok(_) => panic!("expected connection refusal"),
        Err(err) => err,
    };
    assert!(err.is_too_many_connections());
}

#[tokio::test]
async fn rejected_password_reports_login_failure() {
    let (_server, mut config) = start(ScriptedServer::default()).await;
    config.password = "wrong".into();

    let err = match FtpClient::new(config).unwrap().connect().await {
        Ok(_) => panic!("expected login failure"),
        Err(err) => err,
    };
    assert_eq!(err.code(), Some(530));
}

#[tokio::test]
async fn close_sends_quit_once_and_rejects_further_commands() {
    let (server, config) = start(ScriptedServer::default()).await;

    let mut session = FtpClient::new(config).unwrap().connect().await.unwrap();
    session.close().await;
    session.close().await;

    assert!(matches!(session.list("/").await, Err(FtpError::Closed)));
    let quits = server.commands().iter().filter(|c| *c == "QUIT").count();
    assert_eq!(quits, 1);
}
