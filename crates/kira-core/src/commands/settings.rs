use std::io::Write;

use super::Session;
use crate::cli::SettingsAction;
use crate::render::Renderer;

pub(super) fn cmd_settings(
    session: &mut Session,
    renderer: &Renderer,
    action: Option<SettingsAction>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match action.unwrap_or(SettingsAction::Show) {
        SettingsAction::Show => {
            renderer.write_settings(&mut *out, session.state.reminder_settings())
        }
        SettingsAction::Set { days } => {
            let saved = session.state.set_reminder_days(days)?;
            renderer.write_settings(&mut *out, saved)
        }
        SettingsAction::Reset => {
            session.state.reset_reminder_settings()?;
            renderer.write_settings(&mut *out, session.state.reminder_settings())
        }
    }
}
