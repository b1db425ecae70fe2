//! Cookie jar command handlers

use super::utils::Session;
use crate::cli::{CookiesAction, CookiesArgs, CookiesFileArgs, CookiesShowArgs};
use crate::error::{Error, Result};
use crate::logging::redaction;
use crate::output::OutputWriter;
use ehnet_core::cookie::{sign_out, sync_login_cookies};
use ehnet_core::{LoginState, StoredCookie};
use serde::Serialize;
use std::fs;

#[derive(Debug, Serialize)]
struct JarReport {
    #[serde(flatten)]
    login: LoginState,
    cookies: Vec<StoredCookie>,
}

/// Handle the cookies command
pub fn handle_cookies(args: CookiesArgs, session: &Session, output: &mut OutputWriter) -> Result<()> {
    if !session.is_persistent() {
        return Err(Error::invalid_args("the cookies command needs the cookie jar; drop --no-cookies"));
    }
    match args.action {
        CookiesAction::Show(show_args) => handle_show(show_args, session, output),
        CookiesAction::Export(file_args) => handle_export(file_args, session, output),
        CookiesAction::Import(file_args) => handle_import(file_args, session, output),
        CookiesAction::SignOut => {
            sign_out(&**session.jar());
            output.success("✓ Removed the session cookies")
        }
    }
}

fn handle_show(args: CookiesShowArgs, session: &Session, output: &mut OutputWriter) -> Result<()> {
    let jar = session.jar();
    let login = LoginState::inspect(&**jar);
    let mut cookies = jar.snapshot();
    if !args.reveal {
        for cookie in &mut cookies {
            if redaction::is_secret_cookie(&cookie.name) {
                cookie.value = redaction::mask_value(&cookie.value);
            }
        }
    }
    cookies.sort_by(|a, b| (&a.domain, &a.name).cmp(&(&b.domain, &b.name)));

    if !output.is_human() {
        return output.data(&JarReport { login, cookies });
    }

    let yes_no = |flag: bool| if flag { "yes" } else { "no" };
    output.writeln(&format!("Signed in:        {}", yes_no(login.signed_in)))?;
    output.writeln(&format!("ExHentai access:  {}", yes_no(login.exhentai_access)))?;
    if cookies.is_empty() {
        output.info("The cookie jar is empty")?;
        return Ok(());
    }
    output.writeln("")?;
    let rows = cookies
        .into_iter()
        .map(|c| vec![c.domain, c.name, c.value, c.path])
        .collect();
    output.table(&["DOMAIN", "NAME", "VALUE", "PATH"], rows)
}

fn handle_export(args: CookiesFileArgs, session: &Session, output: &mut OutputWriter) -> Result<()> {
    let json = session.jar().export_json()?;
    fs::write(&args.file, json)?;
    output.success(&format!(
        "✓ Exported {} cookies to {}",
        session.jar().len(),
        args.file.display()
    ))
}

fn handle_import(args: CookiesFileArgs, session: &Session, output: &mut OutputWriter) -> Result<()> {
    if !args.file.exists() {
        return Err(Error::FileNotFound { path: args.file });
    }
    let content = fs::read_to_string(&args.file)?;
    let count = session.jar().import_json(&content)?;
    output.success(&format!("✓ Imported {} cookies from {}", count, args.file.display()))?;
    if sync_login_cookies(&**session.jar()) {
        output.info("Copied the login cookies to exhentai.org")?;
    }
    Ok(())
}
