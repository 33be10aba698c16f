//! Resource provisioner.
//!
//! Implements create, read, update and delete for apps, services and links
//! over a [`ResourceData`] record. Mutating operations run their command
//! sequence in order and stop at the first failure; nothing is rolled back,
//! so a failure after some steps leaves the resource partially changed and
//! the caller must re-read it.

use tracing::{debug, info};

use crate::config::{AppConfig, LinkConfig, ServiceConfig};
use crate::error::{DokkuError, ReconcileError, Result};
use crate::resource::ResourceData;

use super::changeset;
use super::client::DokkuClient;
use super::command::DokkuCommand;
use super::observer::DokkuObserver;
use super::types::{DokkuApp, DokkuService};

/// Provisioner for Dokku resources.
#[derive(Debug, Clone)]
pub struct DokkuProvisioner {
    /// Connected client.
    client: DokkuClient,
    /// Reader used to reflect converged state.
    observer: DokkuObserver,
}

impl DokkuProvisioner {
    /// Creates a provisioner over a connected client.
    #[must_use]
    pub fn new(client: DokkuClient) -> Self {
        let observer = DokkuObserver::new(client.clone());
        Self { client, observer }
    }

    /// Returns the observer sharing this provisioner's connection.
    #[must_use]
    pub const fn observer(&self) -> &DokkuObserver {
        &self.observer
    }

    /// Runs a command sequence, stopping at the first failure.
    ///
    /// Every command is checked before the first one runs. A failure on the
    /// first command is returned as is; a later failure is reported as a
    /// partial apply.
    async fn apply(&self, resource: &str, commands: &[DokkuCommand]) -> Result<()> {
        for command in commands {
            command.check()?;
        }
        for (applied, command) in commands.iter().enumerate() {
            if let Err(e) = self.client.run_checked(command).await {
                if applied == 0 {
                    return Err(e);
                }
                return Err(ReconcileError::PartiallyApplied {
                    resource: resource.to_string(),
                    applied,
                    reason: e.to_string(),
                }
                .into());
            }
        }
        debug!("Applied {} command(s) to {resource}", commands.len());
        Ok(())
    }

    // ========================================================================
    // Applications
    // ========================================================================

    /// Creates an app and reads back its state.
    ///
    /// # Errors
    ///
    /// Returns an error if the attributes are invalid or a command fails.
    /// After a partial apply the record carries the app's id.
    pub async fn create_app(&self, data: &mut ResourceData<AppConfig>) -> Result<()> {
        let app = DokkuApp::from_config(data.get())?;
        info!("Creating app {}", app.name);

        let commands = changeset::create_app(&app, self.client.port_commands());
        let result = self.apply(&format!("app {}", app.name), &commands).await;
        if matches!(
            result,
            Err(DokkuError::Reconcile(ReconcileError::PartiallyApplied { .. }))
        ) {
            data.set_id(app.name.as_str());
        }
        result?;

        data.set_id(app.name.as_str());
        self.read_app(data).await
    }

    /// Reads an app into the record, clearing the id if it no longer exists.
    ///
    /// Only configuration variables and ports already in the record are
    /// reflected back.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails.
    pub async fn read_app(&self, data: &mut ResourceData<AppConfig>) -> Result<()> {
        let name = data.id().to_string();
        match self.observer.retrieve_app(&name).await? {
            Some(app) => {
                let observed = app.to_config(Some(data.get()));
                data.set(observed);
            }
            None => {
                debug!("App {name} is gone");
                data.set_id("");
            }
        }
        Ok(())
    }

    /// Converges an app from its prior to its desired attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if a command fails.
    pub async fn update_app(&self, data: &mut ResourceData<AppConfig>) -> Result<()> {
        let commands = changeset::update_app(data, self.client.port_commands());
        let name = data.get().name.clone();
        info!("Updating app {name} ({} command(s))", commands.len());

        self.apply(&format!("app {name}"), &commands).await?;
        data.set_id(name);
        self.read_app(data).await
    }

    /// Destroys an app.
    ///
    /// # Errors
    ///
    /// Returns an error if the destroy command fails.
    pub async fn delete_app(&self, data: &mut ResourceData<AppConfig>) -> Result<()> {
        info!("Destroying app {}", data.id());
        self.client.run_checked(&changeset::destroy_app(data.id())).await?;
        data.set_id("");
        Ok(())
    }

    // ========================================================================
    // Services
    // ========================================================================

    /// Creates a service and reads back its state.
    ///
    /// # Errors
    ///
    /// Returns an error if the attributes are invalid or a command fails.
    pub async fn create_service(&self, data: &mut ResourceData<ServiceConfig>) -> Result<()> {
        let service = DokkuService::from_config(data.get())?;
        info!("Creating {} service {}", service.family, service.name);

        let commands = changeset::create_service(&service, data.get());
        let result = self
            .apply(&format!("{} service {}", service.family, service.name), &commands)
            .await;
        if matches!(
            result,
            Err(DokkuError::Reconcile(ReconcileError::PartiallyApplied { .. }))
        ) {
            data.set_id(service.name.as_str());
        }
        result?;

        data.set_id(service.name.as_str());
        self.read_service(data).await
    }

    /// Reads a service into the record, clearing the id if it no longer
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the info command fails.
    pub async fn read_service(&self, data: &mut ResourceData<ServiceConfig>) -> Result<()> {
        let family = data.get().family;
        let name = data.id().to_string();
        match self.observer.retrieve_service(family, &name).await? {
            Some(service) => {
                let observed = service.to_config(Some(data.get()));
                data.set(observed);
            }
            None => {
                debug!("{family} service {name} is gone");
                data.set_id("");
            }
        }
        Ok(())
    }

    /// Converges a service from its prior to its desired attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if the change needs a clone the family does not
    /// support, or a command fails.
    pub async fn update_service(&self, data: &mut ResourceData<ServiceConfig>) -> Result<()> {
        let name = data.get().name.clone();
        let commands = changeset::update_service(data, &temp_service_name(&name))?;
        info!(
            "Updating {} service {name} ({} command(s))",
            data.get().family,
            commands.len()
        );

        self.apply(&format!("{} service {name}", data.get().family), &commands)
            .await?;
        data.set_id(name);
        self.read_service(data).await
    }

    /// Destroys a service.
    ///
    /// # Errors
    ///
    /// Returns an error if the destroy command fails.
    pub async fn delete_service(&self, data: &mut ResourceData<ServiceConfig>) -> Result<()> {
        let family = data.get().family;
        info!("Destroying {family} service {}", data.id());
        self.client
            .run_checked(&changeset::destroy_service(family, data.id()))
            .await?;
        data.set_id("");
        Ok(())
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// Links a service to an app.
    ///
    /// # Errors
    ///
    /// Returns an error if the link command fails.
    pub async fn create_link(&self, data: &mut ResourceData<LinkConfig>) -> Result<()> {
        let link = data.get();
        info!("Linking {} service {} to {}", link.family, link.service, link.app);
        self.client.run_checked(&changeset::create_link(link)).await?;
        data.set_id(link.link_id());
        Ok(())
    }

    /// Confirms a link still exists, clearing the id if it does not.
    ///
    /// Alias and query string cannot be read back and are kept as recorded.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than "not found".
    pub async fn read_link(&self, data: &mut ResourceData<LinkConfig>) -> Result<()> {
        let link = data.get();
        if self
            .observer
            .link_exists(link.family, &link.service, &link.app)
            .await?
        {
            data.set_id(link.link_id());
        } else {
            debug!("Link {} is gone", link.link_id());
            data.set_id("");
        }
        Ok(())
    }

    /// Unlinks a service from an app.
    ///
    /// # Errors
    ///
    /// Returns an error if the unlink command fails.
    pub async fn delete_link(&self, data: &mut ResourceData<LinkConfig>) -> Result<()> {
        info!("Unlinking {}", data.id());
        self.client
            .run_checked(&changeset::destroy_link(data.get()))
            .await?;
        data.set_id("");
        Ok(())
    }
}

/// Generates a temporary name for the clone-and-back dance.
fn temp_service_name(name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("tmp-{name}-{}", suffix.get(..8).unwrap_or(&suffix))
}
