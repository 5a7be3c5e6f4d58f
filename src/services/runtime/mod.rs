mod dry_run;
mod r#trait;

pub use self::dry_run::DryRunRuntime;
pub use self::r#trait::DesktopRuntime;
