//! Controller behaviour against the in-memory server.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mailsession::testing::{plain_message, FakeDialer, Mailstore, SpyRelay};
use mailsession::{
    Controller, ControllerConfig, ErrorKind, Lifecycle, OutboundMessage, RelayError, SpecialUse,
};

const USER: &str = "me@example.com";
const PASSWORD: &str = "correct horse";

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn store() -> Mailstore {
    init();
    Mailstore::new(USER, PASSWORD)
}

fn connected(store: &Mailstore) -> Controller {
    connected_with(store, ControllerConfig::default())
}

fn connected_with(store: &Mailstore, config: ControllerConfig) -> Controller {
    let c = Controller::with_dialer(config, FakeDialer::new(store));
    c.connect(store.credentials()).unwrap();
    c
}

fn fill(store: &Mailstore, mailbox: &str, n: usize) {
    for i in 1..=n {
        let subject = format!("message {}", i);
        store.deliver(mailbox, plain_message("sender@example.org", &subject, "body"));
    }
}

fn fetches(store: &Mailstore) -> usize {
    store
        .commands()
        .iter()
        .filter(|c| c.starts_with("FETCH"))
        .count()
}

fn with_attachment() -> Vec<u8> {
    b"From: sender@example.org\r\n\
      To: me@example.com\r\n\
      Subject: Invoice\r\n\
      MIME-Version: 1.0\r\n\
      Content-Type: multipart/mixed; boundary=\"b\"\r\n\
      \r\n\
      --b\r\n\
      Content-Type: text/plain\r\n\
      \r\n\
      see attached\r\n\
      --b\r\n\
      Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
      Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
      Content-Transfer-Encoding: base64\r\n\
      \r\n\
      JVBERi0xLjQ=\r\n\
      --b--\r\n"
        .to_vec()
}

#[test]
fn connect_then_disconnect() {
    let store = store();
    let c = connected(&store);
    assert!(c.is_connected());
    assert_eq!(c.lifecycle(), Lifecycle::Connected);
    c.disconnect();
    assert!(!c.is_connected());
    assert!(store.commands().iter().any(|cmd| cmd == "LOGOUT"));

    // disconnect is idempotent and never fails
    c.disconnect();
    assert_eq!(c.lifecycle(), Lifecycle::Disconnected);
}

#[test]
fn every_operation_is_gated() {
    let store = store();
    fill(&store, "INBOX", 1);
    let c = Controller::with_dialer(ControllerConfig::default(), FakeDialer::new(&store));

    let kinds = [
        c.list_mailboxes().map(|_| ()).unwrap_err().kind(),
        c.select_mailbox("INBOX").map(|_| ()).unwrap_err().kind(),
        c.fetch_batch("INBOX", 10).map(|_| ()).unwrap_err().kind(),
        c.set_flag(1, "seen", true).unwrap_err().kind(),
        c.mark_as_read("INBOX", 1, true).unwrap_err().kind(),
        c.delete_message(1).unwrap_err().kind(),
        c.fetch_attachment_content(1, 0).map(|_| ()).unwrap_err().kind(),
        c.send(&OutboundMessage::to(["a@x.com"]).text("hi"))
            .map(|_| ())
            .unwrap_err()
            .kind(),
    ];
    assert!(kinds.iter().all(|k| *k == ErrorKind::NotConnected));
    assert!(store.commands().is_empty());
}

#[test]
fn connect_twice_is_rejected() {
    let store = store();
    let c = connected(&store);
    let err = c.connect(store.credentials()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyConnected);
    assert!(c.is_connected());
    assert_eq!(
        store.commands().iter().filter(|cmd| *cmd == "LOGIN").count(),
        1
    );
}

#[test]
fn unreachable_host() {
    let store = store();
    let c = Controller::with_dialer(
        ControllerConfig::default(),
        FakeDialer::new(&store).unreachable(),
    );
    let err = c.connect(store.credentials()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnreachableHost);
    assert!(!c.is_connected());
}

#[test]
fn failed_relay_verification_faults_and_logs_out() {
    let store = store();
    let relay = SpyRelay::default().failing_verify(RelayError::Permanent("535 auth".into()));
    let c = Controller::with_dialer(
        ControllerConfig::default(),
        FakeDialer::new(&store).with_relay(relay),
    );
    let err = c.connect(store.credentials()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailed);
    assert!(matches!(c.lifecycle(), Lifecycle::Faulted { .. }));
    assert_eq!(store.commands(), vec!["LOGIN", "LOGOUT"]);
    assert_eq!(
        c.list_mailboxes().unwrap_err().kind(),
        ErrorKind::ConnectionLost
    );
}

#[test]
fn batch_is_newest_first_and_bounded() {
    let store = store();
    fill(&store, "INBOX", 7);
    let c = connected(&store);

    let batch = c.fetch_batch("INBOX", 3).unwrap();
    let ids: Vec<u32> = batch.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![7, 6, 5]);
    assert_eq!(batch[0].subject, "message 7");
    assert_eq!(batch[0].uid, Some(7));
    assert!(batch[0].size.unwrap() > 0);

    let all = c.fetch_batch("INBOX", 50).unwrap();
    assert_eq!(all.len(), 7);
    assert!(all.windows(2).all(|w| w[0].id > w[1].id));
}

#[test]
fn zero_limit_and_empty_mailbox_fetch_nothing() {
    let store = store();
    fill(&store, "INBOX", 3);
    store.add_mailbox("Empty", &[]);
    let c = connected(&store);

    assert!(c.fetch_batch("INBOX", 0).unwrap().is_empty());
    assert!(c.fetch_batch("Empty", 10).unwrap().is_empty());
    assert_eq!(fetches(&store), 0);
}

#[test]
fn new_mail_shows_up_on_refetch() {
    let store = store();
    fill(&store, "INBOX", 2);
    let c = connected(&store);
    assert_eq!(c.fetch_batch("INBOX", 10).unwrap().len(), 2);

    store.deliver("INBOX", plain_message("late@example.org", "late", "body"));
    let batch = c.fetch_batch("INBOX", 10).unwrap();
    assert_eq!(batch.len(), 3);
    assert_eq!(batch[0].subject, "late");
    assert!(store.commands().iter().any(|cmd| cmd == "NOOP"));
}

#[test]
fn mailbox_tree() {
    let store = store();
    store.add_mailbox("Archive", &[]);
    store.add_mailbox("Archive/2023", &[]);
    store.add_mailbox("Sent", &["\\Sent"]);
    let c = connected(&store);

    let tree = c.list_mailboxes().unwrap();
    let paths: Vec<&str> = tree.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(paths, vec!["INBOX", "Archive", "Sent"]);
    assert_eq!(tree[1].children.len(), 1);
    assert_eq!(tree[1].children[0].name, "2023");
    assert_eq!(tree[1].children[0].path, "Archive/2023");
    assert_eq!(tree[2].special_use, Some(SpecialUse::Sent));
}

#[test]
fn missing_mailbox_leaves_nothing_selected() {
    let store = store();
    fill(&store, "INBOX", 2);
    let c = connected(&store);

    c.select_mailbox("INBOX").unwrap();
    assert_eq!(
        c.select_mailbox("Nope").unwrap_err().kind(),
        ErrorKind::MailboxNotFound
    );
    assert_eq!(
        c.set_flag(1, "seen", true).unwrap_err().kind(),
        ErrorKind::NoMailboxSelected
    );
    assert_eq!(
        c.fetch_batch("Nope", 5).unwrap_err().kind(),
        ErrorKind::MailboxNotFound
    );
    assert!(c.is_connected());
}

#[test]
fn flags_change_on_the_server() {
    let store = store();
    fill(&store, "INBOX", 2);
    let c = connected(&store);
    c.select_mailbox("INBOX").unwrap();

    c.set_flag(2, "flagged", true).unwrap();
    c.set_flag(2, "\\SEEN", true).unwrap();
    assert_eq!(
        store.flags("INBOX", 2).unwrap(),
        vec!["\\Flagged", "\\Seen"]
    );
    c.set_flag(2, "Flagged", false).unwrap();
    assert_eq!(store.flags("INBOX", 2).unwrap(), vec!["\\Seen"]);

    c.mark_as_read("INBOX", 1, true).unwrap();
    let batch = c.fetch_batch("INBOX", 2).unwrap();
    assert!(batch.iter().all(|m| m.is_seen()));
}

#[test]
fn bad_flag_requests_never_reach_the_wire() {
    let store = store();
    fill(&store, "INBOX", 2);
    let c = connected(&store);
    c.select_mailbox("INBOX").unwrap();
    let before = store.commands().len();

    assert_eq!(
        c.set_flag(3, "seen", true).unwrap_err().kind(),
        ErrorKind::MessageNotFound
    );
    assert_eq!(
        c.set_flag(1, "\\Recent", true).unwrap_err().kind(),
        ErrorKind::InvalidRequest
    );
    assert_eq!(
        c.set_flag(1, "\\Bogus", true).unwrap_err().kind(),
        ErrorKind::InvalidRequest
    );
    assert_eq!(store.commands().len(), before);
}

#[test]
fn id_check_uses_the_last_known_count() {
    let store = store();
    fill(&store, "INBOX", 2);
    let c = connected(&store);
    c.select_mailbox("INBOX").unwrap();

    store.deliver("INBOX", plain_message("late@example.org", "late", "body"));
    let before = store.commands().len();
    assert_eq!(
        c.set_flag(3, "seen", true).unwrap_err().kind(),
        ErrorKind::MessageNotFound
    );
    assert_eq!(store.commands().len(), before);

    // the mailbox-qualified form refreshes the count first
    c.set_flag_in("INBOX", 3, "seen", true).unwrap();
    assert_eq!(store.flags("INBOX", 3).unwrap(), vec!["\\Seen"]);
    c.delete_message(3).unwrap();
    assert_eq!(store.count("INBOX"), 2);
}

#[test]
fn refused_store_is_message_not_found() {
    let store = store();
    fill(&store, "INBOX", 1);
    let c = connected(&store);
    c.select_mailbox("INBOX").unwrap();
    store.reject_stores(true);
    assert_eq!(
        c.set_flag(1, "seen", true).unwrap_err().kind(),
        ErrorKind::MessageNotFound
    );
    assert!(c.is_connected());
}

#[test]
fn delete_compacts_every_flagged_message() {
    let store = store();
    store.deliver("INBOX", plain_message("a@example.org", "keep", "1"));
    store.deliver_with_flags(
        "INBOX",
        plain_message("a@example.org", "old", "2"),
        &["\\Deleted"],
    );
    store.deliver("INBOX", plain_message("a@example.org", "target", "3"));
    store.deliver("INBOX", plain_message("a@example.org", "last", "4"));
    let c = connected(&store);
    c.select_mailbox("INBOX").unwrap();

    c.delete_message(3).unwrap();
    assert_eq!(store.count("INBOX"), 2);

    // sequence numbers have shifted
    let batch = c.fetch_batch("INBOX", 10).unwrap();
    let subjects: Vec<&str> = batch.iter().map(|m| m.subject.as_str()).collect();
    assert_eq!(subjects, vec!["last", "keep"]);
    assert_eq!(batch[0].id, 2);
    assert_eq!(
        c.delete_message(3).unwrap_err().kind(),
        ErrorKind::MessageNotFound
    );
}

#[test]
fn delete_in_other_mailbox() {
    let store = store();
    fill(&store, "INBOX", 1);
    fill(&store, "Archive", 2);
    let c = connected(&store);
    c.delete_message_in("Archive", 1).unwrap();
    assert_eq!(store.count("Archive"), 1);
    assert_eq!(store.count("INBOX"), 1);
}

#[test]
fn attachments_are_fetched_on_demand() {
    let store = store();
    store.deliver("INBOX", with_attachment());
    let c = connected(&store);

    let batch = c.fetch_batch("INBOX", 1).unwrap();
    let attachment = &batch[0].attachments[0];
    assert_eq!(attachment.filename, "invoice.pdf");
    assert_eq!(attachment.content_type, "application/pdf");
    assert_eq!(attachment.size, 8);

    let content = c.fetch_attachment_content(1, 0).unwrap();
    assert_eq!(content.filename, "invoice.pdf");
    assert_eq!(content.content, b"%PDF-1.4");
    assert_eq!(
        c.fetch_attachment_content(1, 1).unwrap_err().kind(),
        ErrorKind::AttachmentNotFound
    );
}

#[test]
fn undecodable_messages_are_skipped() {
    let store = store();
    fill(&store, "INBOX", 2);
    store.deliver("INBOX", b"this is not a message".to_vec());
    fill(&store, "INBOX", 2);
    let c = connected(&store);
    let batch = c.fetch_batch("INBOX", 10).unwrap();
    assert_eq!(batch.len(), 4);
    let ids: Vec<u32> = batch.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![5, 4, 2, 1]);
}

#[test]
fn refetch_without_changes_is_identical() {
    let store = store();
    fill(&store, "INBOX", 5);
    let c = connected(&store);

    let first = c.fetch_batch("INBOX", 3).unwrap();
    let second = c.fetch_batch("INBOX", 3).unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn dropped_link_faults_the_session() {
    let store = store();
    fill(&store, "INBOX", 1);
    let c = connected(&store);
    store.drop_next_command();

    assert_eq!(
        c.fetch_batch("INBOX", 1).unwrap_err().kind(),
        ErrorKind::ConnectionLost
    );
    assert!(matches!(c.lifecycle(), Lifecycle::Faulted { .. }));
    assert_eq!(
        c.list_mailboxes().unwrap_err().kind(),
        ErrorKind::ConnectionLost
    );
    assert_eq!(
        c.send(&OutboundMessage::to(["a@x.com"]).text("hi"))
            .unwrap_err()
            .kind(),
        ErrorKind::ConnectionLost
    );

    c.connect(store.credentials()).unwrap();
    assert_eq!(c.fetch_batch("INBOX", 1).unwrap().len(), 1);
}

#[test]
fn stuck_read_times_out() {
    let store = store();
    let c = connected_with(
        &store,
        ControllerConfig::default().io_timeout(Some(Duration::from_millis(50))),
    );
    store.hang_next_command();
    let err = c.list_mailboxes().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    assert!(err.detail().starts_with("timed out"));
    assert!(matches!(c.lifecycle(), Lifecycle::Faulted { .. }));
}

#[test]
fn disconnect_interrupts_a_wedged_operation() {
    let store = store();
    let c = Arc::new(connected_with(
        &store,
        ControllerConfig::default().io_timeout(None),
    ));
    store.hang_next_command();

    let worker = {
        let c = Arc::clone(&c);
        thread::spawn(move || c.list_mailboxes().map(|_| ()))
    };
    while !store.commands().iter().any(|cmd| cmd.starts_with("LIST")) {
        thread::sleep(Duration::from_millis(1));
    }

    let started = Instant::now();
    c.disconnect();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        worker.join().unwrap().unwrap_err().kind(),
        ErrorKind::ConnectionLost
    );
    assert_eq!(c.lifecycle(), Lifecycle::Disconnected);
}

#[test]
fn send_runs_while_retrieval_is_busy() {
    init();
    let store = Mailstore::new(USER, PASSWORD);
    let relay = SpyRelay::default();
    let sent = relay.sent();
    let c = Arc::new(Controller::with_dialer(
        ControllerConfig::default().io_timeout(None),
        FakeDialer::new(&store).with_relay(relay),
    ));
    c.connect(store.credentials()).unwrap();
    store.hang_next_command();

    let worker = {
        let c = Arc::clone(&c);
        thread::spawn(move || c.list_mailboxes().map(|_| ()))
    };
    while !store.commands().iter().any(|cmd| cmd.starts_with("LIST")) {
        thread::sleep(Duration::from_millis(1));
    }

    let receipt = c
        .send(&OutboundMessage::to(["friend@example.org"]).subject("hi").text("body"))
        .unwrap();
    assert!(receipt.message_id.ends_with("@example.com>"));
    assert_eq!(sent.lock().unwrap().len(), 1);

    c.disconnect();
    assert!(worker.join().unwrap().is_err());
}

#[test]
fn send_without_recipients_never_reaches_the_relay() {
    init();
    let store = Mailstore::new(USER, PASSWORD);
    let relay = SpyRelay::default();
    let sent = relay.sent();
    let c = Controller::with_dialer(
        ControllerConfig::default(),
        FakeDialer::new(&store).with_relay(relay),
    );
    c.connect(store.credentials()).unwrap();

    let no_recipients = OutboundMessage::default().subject("hello").text("body");
    assert_eq!(
        c.send(&no_recipients).unwrap_err().kind(),
        ErrorKind::InvalidRequest
    );
    let blank_recipient = OutboundMessage::to(["  "]).text("body");
    assert_eq!(
        c.send(&blank_recipient).unwrap_err().kind(),
        ErrorKind::InvalidRequest
    );
    assert!(sent.lock().unwrap().is_empty());
    assert!(c.is_connected());
}

#[test]
fn refused_send_leaves_session_connected() {
    init();
    let store = Mailstore::new(USER, PASSWORD);
    let relay = SpyRelay::default().failing_transmit(RelayError::Permanent("550 no".into()));
    let c = Controller::with_dialer(
        ControllerConfig::default(),
        FakeDialer::new(&store).with_relay(relay),
    );
    c.connect(store.credentials()).unwrap();
    let err = c
        .send(&OutboundMessage::to(["friend@example.org"]).text("body"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransmissionRejected);
    assert!(c.is_connected());
}

#[test]
fn concurrent_callers_never_interleave() {
    let store = store();
    fill(&store, "INBOX", 5);
    fill(&store, "Archive", 5);
    store.set_latency(Duration::from_millis(2));
    let c = Arc::new(connected(&store));

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let c = Arc::clone(&c);
            thread::spawn(move || {
                for round in 0..5 {
                    let mailbox = if (i + round) % 2 == 0 { "INBOX" } else { "Archive" };
                    let batch = c.fetch_batch(mailbox, 3).unwrap();
                    assert_eq!(batch.len(), 3);
                    c.mark_as_read(mailbox, 5, true).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(store.overlaps(), 0);
    assert!(c.is_connected());
}
