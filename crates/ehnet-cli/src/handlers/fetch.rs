//! Request command handlers

use super::utils::{parse_fields, read_json_arg, Session};
use crate::cli::{GetArgs, PostFormArgs, PostJsonArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use ehnet_core::RawResponse;
use std::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Handle the get command
#[instrument(skip_all, fields(url = %args.url))]
pub async fn handle_get(
    args: GetArgs,
    config: &Config,
    session: &Session,
    cancel: &CancellationToken,
    output: &mut OutputWriter,
) -> Result<()> {
    let _timer = Timer::with_details("get", &args.url);
    let transport = session.transport(config)?;
    let referer = args.referer.as_deref();

    let spinner = output.spinner(&format!("Fetching {}", args.url));
    let result = if args.image {
        transport.get_image_with_cancel(&args.url, referer, cancel).await
    } else if args.no_redirect {
        transport.get_no_redirect_with_cancel(&args.url, referer, cancel).await
    } else {
        transport.get_with_cancel(&args.url, referer, cancel).await
    };
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let response = result?;
    info!(status = response.status().as_u16(), bytes = response.body().len(), "fetched");

    if let Some(path) = &args.save_to {
        debug!(path = %path.display(), "writing body");
        fs::write(path, response.body())?;
        output.success(&format!(
            "✓ Saved {} bytes to {}",
            response.body().len(),
            path.display()
        ))?;
        return Ok(());
    }

    report_redirect(&response, output)?;
    output.response(&args.url, &response, args.include_headers)
}

/// Handle the post-form command
#[instrument(skip_all, fields(url = %args.url))]
pub async fn handle_post_form(
    args: PostFormArgs,
    config: &Config,
    session: &Session,
    cancel: &CancellationToken,
    output: &mut OutputWriter,
) -> Result<()> {
    let _timer = Timer::with_details("post_form", &args.url);
    if args.raw.is_none() && args.fields.is_empty() {
        return Err(Error::invalid_args("give at least one --field or a --raw body"));
    }
    let transport = session.transport(config)?;
    let referer = args.referer.as_deref();
    let origin = args.origin.as_deref();

    let response = match &args.raw {
        Some(body) => {
            transport
                .post_raw_form_with_cancel(&args.url, body, referer, origin, cancel)
                .await?
        }
        None => {
            let fields = parse_fields(&args.fields)?;
            transport
                .post_form_with_cancel(&args.url, &fields, referer, origin, cancel)
                .await?
        }
    };

    report_redirect(&response, output)?;
    output.response(&args.url, &response, args.include_headers)
}

/// Handle the post-json command
#[instrument(skip_all, fields(url = %args.url))]
pub async fn handle_post_json(
    args: PostJsonArgs,
    config: &Config,
    session: &Session,
    cancel: &CancellationToken,
    output: &mut OutputWriter,
) -> Result<()> {
    let _timer = Timer::with_details("post_json", &args.url);
    let payload = read_json_arg(&args.json)?;
    let transport = session.transport(config)?;

    let response = transport
        .post_json_with_cancel(
            &args.url,
            &payload,
            args.referer.as_deref(),
            args.origin.as_deref(),
            cancel,
        )
        .await?;

    if args.pretty && output.is_human() {
        let value: serde_json::Value = response.json()?;
        return output.writeln(&serde_json::to_string_pretty(&value)?);
    }
    output.response(&args.url, &response, false)
}

fn report_redirect(response: &RawResponse, output: &mut OutputWriter) -> Result<()> {
    if response.status().is_redirection() {
        if let Some(location) = response.location() {
            output.info(&format!("Redirect ({}) to {}", response.status().as_u16(), location))?;
        }
    }
    Ok(())
}
