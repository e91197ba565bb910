use anyhow::Result;

use super::{file_matches, write_file, Action, ActionState, Applied, Policy};
use crate::error::ProvisionError;
use crate::host::Host;
use crate::layout::HostPath;
use crate::manifest::{DesktopEntryDefinition, MenuDefinition};

/// Render a freedesktop `.desktop` file. The menu tag leads the category list.
pub fn render_desktop_entry(entry: &DesktopEntryDefinition, tag: &str) -> String {
    let mut categories = String::new();
    for category in std::iter::once(tag).chain(entry.categories.iter().map(String::as_str)) {
        categories.push_str(category);
        categories.push(';');
    }

    format!(
        "[Desktop Entry]\n\
         Version=1.0\n\
         Type=Application\n\
         Name={}\n\
         Comment={}\n\
         Exec={}\n\
         Icon={}\n\
         Terminal={}\n\
         Categories={}\n",
        entry.name, entry.comment, entry.exec, entry.icon, entry.terminal, categories
    )
}

/// Render the `.directory` file naming the submenu.
pub fn render_directory_file(menu: &MenuDefinition) -> String {
    format!(
        "[Desktop Entry]\n\
         Version=1.0\n\
         Type=Directory\n\
         Name={}\n\
         Comment={}\n\
         Icon={}\n",
        menu.name, menu.comment, menu.icon
    )
}

/// Render the menu-merge fragment grouping every entry tagged `menu.tag`.
pub fn render_menu_merge(menu: &MenuDefinition) -> String {
    format!(
        r#"<!DOCTYPE Menu PUBLIC "-//freedesktop//DTD Menu 1.0//EN"
 "http://www.freedesktop.org/standards/menu-spec/menu-1.0.dtd">
<Menu>
  <Name>Applications</Name>
  <Menu>
    <Name>{name}</Name>
    <Directory>{id}.directory</Directory>
    <Include>
      <Category>{tag}</Category>
    </Include>
  </Menu>
</Menu>
"#,
        name = menu.name,
        id = menu.id,
        tag = menu.tag
    )
}

/// One launcher under the applications directory.
pub struct DesktopEntry {
    entry: DesktopEntryDefinition,
    tag: String,
}

impl DesktopEntry {
    pub fn new(entry: DesktopEntryDefinition, tag: String) -> Self {
        Self { entry, tag }
    }
}

impl Action for DesktopEntry {
    fn name(&self) -> String {
        format!("desktop entry {}", self.entry.file)
    }

    /// An entry that depends on a marker file may lose it to an optional
    /// checkout, so it never aborts the run.
    fn policy(&self) -> Policy {
        if self.entry.requires.is_some() {
            Policy::BestEffort
        } else {
            Policy::Required
        }
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        if let Some(marker) = &self.entry.requires {
            let marker = host.layout.base_relative(marker);
            if !marker.exists() {
                return Ok(ActionState::Skip(format!("{} not present", marker.display())));
            }
        }

        let path = host.layout.path(HostPath::Applications).join(&self.entry.file);
        let contents = render_desktop_entry(&self.entry, &self.tag);
        if file_matches(&path, &contents, None) {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("write {}", path.display())))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        if let Some(marker) = &self.entry.requires {
            let marker = host.layout.base_relative(marker);
            if !marker.exists() {
                return Err(ProvisionError::MarkerMissing(marker).into());
            }
        }

        let path = host.layout.path(HostPath::Applications).join(&self.entry.file);
        write_file(&path, &render_desktop_entry(&self.entry, &self.tag), Some(0o644))?;
        Ok(Applied::detail(path.display().to_string()))
    }
}

/// The custom submenu: a `.directory` descriptor plus its merge fragment.
pub struct MenuCategory {
    menu: MenuDefinition,
}

impl MenuCategory {
    pub fn new(menu: MenuDefinition) -> Self {
        Self { menu }
    }

    fn files(&self, host: &Host) -> [(std::path::PathBuf, String); 2] {
        [
            (
                host.layout
                    .path(HostPath::DesktopDirectories)
                    .join(format!("{}.directory", self.menu.id)),
                render_directory_file(&self.menu),
            ),
            (
                host.layout
                    .path(HostPath::MenusMerged)
                    .join(format!("{}.menu", self.menu.id)),
                render_menu_merge(&self.menu),
            ),
        ]
    }
}

impl Action for MenuCategory {
    fn name(&self) -> String {
        format!("menu category {}", self.menu.id)
    }

    fn policy(&self) -> Policy {
        Policy::Required
    }

    fn check(&self, host: &Host) -> Result<ActionState> {
        let stale: Vec<String> = self
            .files(host)
            .iter()
            .filter(|(path, contents)| !file_matches(path, contents, None))
            .map(|(path, _)| path.display().to_string())
            .collect();

        if stale.is_empty() {
            Ok(ActionState::Satisfied)
        } else {
            Ok(ActionState::Pending(format!("write {}", stale.join(", "))))
        }
    }

    fn apply(&self, host: &Host) -> Result<Applied> {
        for (path, contents) in self.files(host) {
            write_file(&path, &contents, Some(0o644))?;
        }
        Ok(Applied::detail(self.menu.tag.clone()))
    }
}
