//! End-to-end tests over loopback TCP: mailbox ingestion and access,
//! relaying through a transfer server, bounces and monitoring

use relaymail::config::{
    Authority, DomainTable, MailboxConfig, MonitoringTarget, TransferConfig, UserTable,
};
use relaymail::transfer::relay::{TRANSFER_FAILED, UNKNOWN_DOMAINS};
use relaymail::transport::MAX_LINE_LENGTH;
use relaymail::{MailboxHandle, MailboxServer, MonitoringServer, TransferHandle, TransferServer};
use std::collections::HashSet;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Line-based test client keeping one reader for the whole session
struct Client {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    fn connect(addr: SocketAddr, greeting: &str) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        let mut client = Self { stream, reader };
        assert_eq!(client.read_line(), greeting);
        client
    }

    fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    fn send_command(&mut self, command: &str) -> String {
        writeln!(self.stream, "{command}").unwrap();
        self.stream.flush().unwrap();
        self.read_line()
    }

    /// Send a command and collect `lines` reply lines
    fn send_multiline(&mut self, command: &str, lines: usize) -> Vec<String> {
        let first = self.send_command(command);
        let mut reply = vec![first];
        for _ in 1..lines {
            reply.push(self.read_line());
        }
        reply
    }

    /// True once the server has closed the connection
    fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => true,
            Ok(_) => false,
            // a read timeout means the server is still waiting for input
            Err(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
        }
    }
}

fn users() -> UserTable {
    UserTable::new()
        .with("zaphod", "42")
        .with("arthur", "towel")
        .with("trillian", "12345")
}

fn start_mailbox(domain: &str) -> MailboxHandle {
    MailboxServer::new(MailboxConfig::new(domain, users()))
        .start()
        .unwrap()
}

fn transfer_config() -> TransferConfig {
    TransferConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        producer_workers: 4,
        consumer_workers: 2,
        connect_timeout_ms: 1000,
        read_timeout_ms: 2000,
        ..TransferConfig::default()
    }
}

fn start_transfer(config: TransferConfig, domains: DomainTable) -> TransferHandle {
    TransferServer::new(config, domains).start().unwrap()
}

fn authority(addr: SocketAddr) -> Authority {
    Authority::new(&addr.ip().to_string(), addr.port())
}

/// Poll until `condition` holds or the timeout passes
fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

fn submit(addr: SocketAddr, to: &str, from: &str, subject: &str, data: &str) {
    let mut client = Client::connect(addr, "ok DMTP");
    assert_eq!(client.send_command("begin"), "ok");
    assert!(client.send_command(&format!("to {to}")).starts_with("ok"));
    assert_eq!(client.send_command(&format!("from {from}")), "ok");
    assert_eq!(client.send_command(&format!("subject {subject}")), "ok");
    assert_eq!(client.send_command(&format!("data {data}")), "ok");
    assert_eq!(client.send_command("send"), "ok");
    assert_eq!(client.send_command("quit"), "ok bye");
}

fn login(addr: SocketAddr, user: &str, password: &str) -> Client {
    let mut client = Client::connect(addr, "ok DMAP");
    assert_eq!(client.send_command(&format!("login {user} {password}")), "ok");
    client
}

#[test]
fn test_mailbox_ingestion_scenario() {
    let mailbox = start_mailbox("univer.ze");
    let mut client = Client::connect(mailbox.dmtp_addr(), "ok DMTP");

    let replies: Vec<String> = [
        "begin",
        "to zaphod@univer.ze,arthur@univer.ze",
        "from trillian@earth.planet",
        "subject hi",
        "data hello",
        "send",
        "quit",
    ]
    .iter()
    .map(|command| client.send_command(command))
    .collect();

    assert_eq!(replies, ["ok", "ok 2", "ok", "ok", "ok", "ok", "ok bye"]);
    assert_eq!(mailbox.store().message_count("zaphod"), 1);
    assert_eq!(mailbox.store().message_count("arthur"), 1);
    mailbox.shutdown();
}

#[test]
fn test_ingestion_validation_keeps_session_open() {
    let mailbox = start_mailbox("univer.ze");
    let mut client = Client::connect(mailbox.dmtp_addr(), "ok DMTP");

    assert_eq!(client.send_command("begin"), "ok");
    assert_eq!(
        client.send_command("to zaphod@univer.ze,marvin@univer.ze"),
        "error unknown recipient marvin"
    );
    assert_eq!(
        client.send_command("to ford@betelgeuse.seven"),
        "error no known domain"
    );
    assert_eq!(client.send_command("send"), "error email is missing recipients");
    assert_eq!(client.send_command("to zaphod@univer.ze"), "ok 1");
    assert_eq!(client.send_command("send"), "error email is missing sender");
    assert_eq!(client.send_command("from arthur@univer.ze"), "ok");
    assert_eq!(client.send_command("send"), "error email is missing data");
    assert_eq!(client.send_command("data there"), "ok");
    assert_eq!(client.send_command("send"), "ok");
    assert_eq!(client.send_command("quit"), "ok bye");

    assert_eq!(mailbox.store().message_count("zaphod"), 1);
    mailbox.shutdown();
}

#[test]
fn test_dmtp_protocol_errors_close_session() {
    let mailbox = start_mailbox("univer.ze");

    let mut client = Client::connect(mailbox.dmtp_addr(), "ok DMTP");
    assert_eq!(client.send_command("to zaphod@univer.ze"), "error protocol error");
    assert!(client.is_closed());

    let mut client = Client::connect(mailbox.dmtp_addr(), "ok DMTP");
    assert_eq!(client.send_command("begin"), "ok");
    assert_eq!(client.send_command("hello"), "error command not supported");
    assert!(client.is_closed());

    mailbox.shutdown();
}

#[test]
fn test_overlong_line_closes_session() {
    let mailbox = start_mailbox("univer.ze");

    // exactly as many bytes as the server buffers, with no terminator
    let mut command = String::from("data ");
    command.push_str(&"x".repeat(MAX_LINE_LENGTH + 2 - command.len()));

    let mut client = Client::connect(mailbox.dmtp_addr(), "ok DMTP");
    assert_eq!(client.send_command("begin"), "ok");
    client.stream.write_all(command.as_bytes()).unwrap();
    assert_eq!(client.read_line(), "error line too long");
    assert!(client.is_closed());

    let mut client = Client::connect(mailbox.dmap_addr(), "ok DMAP");
    client.stream.write_all(command.as_bytes()).unwrap();
    assert_eq!(client.read_line(), "error line too long");
    assert!(client.is_closed());

    mailbox.shutdown();
}

#[test]
fn test_stopped_mailbox_refuses_connections() {
    let mailbox = start_mailbox("univer.ze");
    let dmtp = mailbox.dmtp_addr();
    let dmap = mailbox.dmap_addr();
    Client::connect(dmtp, "ok DMTP");

    mailbox.shutdown();

    assert!(TcpStream::connect_timeout(&dmtp, TIMEOUT).is_err());
    assert!(TcpStream::connect_timeout(&dmap, TIMEOUT).is_err());
}

#[test]
fn test_wrong_password_closes_session() {
    let mailbox = start_mailbox("univer.ze");
    let mut client = Client::connect(mailbox.dmap_addr(), "ok DMAP");

    assert_eq!(client.send_command("login zaphod wrongpass"), "error wrong password");
    let _ = writeln!(client.stream, "list");
    assert!(client.is_closed());

    let mut client = Client::connect(mailbox.dmap_addr(), "ok DMAP");
    assert_eq!(client.send_command("login marvin 42"), "error unknown user");
    assert!(client.is_closed());

    mailbox.shutdown();
}

#[test]
fn test_list_show_delete() {
    let mailbox = start_mailbox("univer.ze");
    submit(
        mailbox.dmtp_addr(),
        "zaphod@univer.ze,arthur@univer.ze",
        "trillian@earth.planet",
        "greetings",
        "hello there",
    );

    let mut client = login(mailbox.dmap_addr(), "zaphod", "42");
    let listing = client.send_command("list");
    let (id, rest) = listing.split_once(' ').unwrap();
    assert_eq!(rest, "trillian@earth.planet greetings");

    let shown = client.send_multiline(&format!("show {id}"), 4);
    assert_eq!(
        shown,
        [
            "from trillian@earth.planet",
            "to zaphod@univer.ze,arthur@univer.ze",
            "subject greetings",
            "data hello there"
        ]
    );

    assert_eq!(client.send_command("show zero"), "error invalid number");
    assert_eq!(client.send_command(&format!("delete {id}")), "ok");
    assert_eq!(
        client.send_command(&format!("show {id}")),
        format!("error no mail with id {id}")
    );
    assert_eq!(client.send_command("list"), "ok");
    assert_eq!(client.send_command("quit"), "ok bye");

    // arthur's copy is untouched
    assert_eq!(mailbox.store().message_count("arthur"), 1);
    mailbox.shutdown();
}

#[test]
fn test_no_mailbox_found() {
    let mailbox = start_mailbox("univer.ze");
    let mut client = login(mailbox.dmap_addr(), "trillian", "12345");

    for command in ["list", "show 0", "delete 0"] {
        assert_eq!(client.send_command(command), "error no mailbox found");
    }
    assert_eq!(client.send_command("logout"), "ok");
    assert_eq!(client.send_command("login zaphod 42"), "ok");
    assert_eq!(client.send_command("quit"), "ok bye");
    mailbox.shutdown();
}

#[test]
fn test_concurrent_sessions_get_distinct_ids() {
    const SESSIONS: usize = 16;
    let mailbox = start_mailbox("univer.ze");
    let addr = mailbox.dmtp_addr();

    let workers: Vec<_> = (0..SESSIONS)
        .map(|n| {
            thread::spawn(move || {
                submit(
                    addr,
                    "zaphod@univer.ze",
                    "arthur@univer.ze",
                    &format!("message-{n}"),
                    "payload",
                )
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let ids: HashSet<u64> = mailbox
        .store()
        .list("zaphod")
        .unwrap()
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, (0..SESSIONS as u64).collect::<HashSet<_>>());
    mailbox.shutdown();
}

#[test]
fn test_transfer_relays_to_mailbox() {
    let mailbox = start_mailbox("univer.ze");
    let domains = DomainTable::new().with("univer.ze", authority(mailbox.dmtp_addr()));
    let transfer = start_transfer(transfer_config(), domains);

    submit(
        transfer.local_addr(),
        "zaphod@univer.ze,arthur@univer.ze",
        "trillian@univer.ze",
        "relayed",
        "via transfer",
    );

    let store = mailbox.store().clone();
    assert!(wait_until(|| store.message_count("zaphod") == 1
        && store.message_count("arthur") == 1));
    let (_, email) = store.list("zaphod").unwrap().remove(0);
    assert_eq!(email.subject, "relayed");
    assert_eq!(email.sender, "trillian@univer.ze");

    transfer.shutdown();
    mailbox.shutdown();
}

#[test]
fn test_transfer_rejects_invalid_address() {
    let transfer = start_transfer(transfer_config(), DomainTable::new());
    let mut client = Client::connect(transfer.local_addr(), "ok DMTP");

    assert_eq!(client.send_command("begin"), "ok");
    assert_eq!(
        client.send_command("to zaphod@univer.ze,not-an-address"),
        "error invalid email pattern not-an-address"
    );
    assert!(client.is_closed());
    transfer.shutdown();
}

#[test]
fn test_shutdown_drains_queued_mail() {
    let mailbox = start_mailbox("univer.ze");
    let domains = DomainTable::new().with("univer.ze", authority(mailbox.dmtp_addr()));
    let transfer = start_transfer(transfer_config(), domains);

    for n in 0..5 {
        submit(
            transfer.local_addr(),
            "zaphod@univer.ze",
            "arthur@univer.ze",
            &format!("queued-{n}"),
            "body",
        );
    }
    transfer.shutdown();

    assert_eq!(mailbox.store().message_count("zaphod"), 5);
    mailbox.shutdown();
}

#[test]
fn test_unroutable_recipient_bounces_once() {
    let mailbox = start_mailbox("univer.ze");
    let domains = DomainTable::new().with("univer.ze", authority(mailbox.dmtp_addr()));
    let transfer = start_transfer(transfer_config(), domains);

    submit(
        transfer.local_addr(),
        "ford@betelgeuse.seven",
        "trillian@univer.ze",
        "lost",
        "into the void",
    );
    transfer.shutdown();

    let bounces = mailbox.store().list("trillian").unwrap();
    assert_eq!(bounces.len(), 1);
    let (_, bounce) = &bounces[0];
    assert_eq!(bounce.sender, "mailer@127.0.0.1");
    assert_eq!(
        bounce.subject,
        format!("{UNKNOWN_DOMAINS} betelgeuse.seven")
    );
    assert!(bounce.data.contains("subject: lost"));
    mailbox.shutdown();
}

#[test]
fn test_failed_destination_bounces_to_sender() {
    let mailbox = start_mailbox("univer.ze");
    // bound then released, so connecting is refused
    let dead = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let domains = DomainTable::new()
        .with("univer.ze", authority(mailbox.dmtp_addr()))
        .with("dead.end", authority(dead));
    let transfer = start_transfer(transfer_config(), domains);

    submit(
        transfer.local_addr(),
        "zaphod@univer.ze,ghost@dead.end",
        "trillian@univer.ze",
        "partly",
        "half of this arrives",
    );
    transfer.shutdown();

    assert_eq!(mailbox.store().message_count("zaphod"), 1);
    let bounces = mailbox.store().list("trillian").unwrap();
    assert_eq!(bounces.len(), 1);
    assert_eq!(bounces[0].1.subject, TRANSFER_FAILED);
    mailbox.shutdown();
}

#[test]
fn test_deliveries_are_reported_to_monitoring() {
    let collector = MonitoringServer::start_with_socket(UdpSocket::bind("127.0.0.1:0").unwrap())
        .unwrap();
    let mailbox = start_mailbox("univer.ze");
    let domains = DomainTable::new().with("univer.ze", authority(mailbox.dmtp_addr()));
    let config = TransferConfig {
        monitoring: Some(MonitoringTarget {
            host: "127.0.0.1".to_string(),
            port: collector.local_addr().port(),
            timeout_ms: 2000,
        }),
        ..transfer_config()
    };
    let transfer = start_transfer(config, domains);

    submit(
        transfer.local_addr(),
        "zaphod@univer.ze",
        "trillian@univer.ze",
        "counted",
        "once",
    );
    transfer.shutdown();

    assert_eq!(
        collector.addresses(),
        [("trillian@univer.ze".to_string(), 1)]
    );
    let servers = collector.servers();
    assert_eq!(servers.len(), 1);
    assert!(servers[0].0.starts_with("127.0.0.1:"));

    collector.shutdown();
    mailbox.shutdown();
}
