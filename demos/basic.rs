//! List mailboxes and the newest messages of one account.
//!
//! Either pass an account file:
//!
//! ```text
//! cargo run --example basic -- account.toml
//! ```
//!
//! or set `MAIL_USER`, `MAIL_PASSWORD`, `MAIL_IMAP_HOST` and `MAIL_SMTP_HOST`.
//! Set `RUST_LOG=mailsession=trace` to see the IMAP conversation.

use mailsession::{AccountFile, Controller, ControllerConfig, Credentials, Endpoint, Mailbox};

fn from_env() -> Option<Credentials> {
    let var = |name| std::env::var(name).ok();
    Some(Credentials::new(
        var("MAIL_USER")?,
        var("MAIL_PASSWORD")?,
        Endpoint::new(var("MAIL_IMAP_HOST")?, 993, true),
        Endpoint::new(var("MAIL_SMTP_HOST")?, 465, true),
    ))
}

fn print_tree(mailboxes: &[Mailbox], depth: usize) {
    for mailbox in mailboxes {
        let usage = mailbox
            .special_use
            .map(|u| format!(" ({:?})", u))
            .unwrap_or_default();
        println!("{:indent$}{}{}", "", mailbox.name, usage, indent = depth * 2);
        print_tree(&mailbox.children, depth + 1);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (credentials, config) = match std::env::args().nth(1) {
        Some(path) => {
            let file = AccountFile::load(path)?;
            (file.account, file.session)
        }
        None => match from_env() {
            Some(credentials) => (credentials, ControllerConfig::default()),
            None => {
                eprintln!("usage: basic <account.toml>");
                eprintln!("   or set MAIL_USER, MAIL_PASSWORD, MAIL_IMAP_HOST and MAIL_SMTP_HOST");
                std::process::exit(2);
            }
        },
    };

    let controller = Controller::new(config);
    controller.connect(credentials)?;

    print_tree(&controller.list_mailboxes()?, 0);

    let status = controller.select_mailbox("INBOX")?;
    println!("\nINBOX: {} messages, {} recent", status.exists, status.recent);
    for message in controller.fetch_batch("INBOX", 10)? {
        println!(
            "{:>5} {} {:<30} {}{}",
            message.id,
            if message.is_seen() { ' ' } else { '*' },
            message.from,
            message.subject,
            if message.attachments.is_empty() { "" } else { " [+]" },
        );
    }

    controller.disconnect();
    Ok(())
}
