use tonic::{Request, Response, Status};

use mackenzie_core::db::Db;
use mackenzie_core::error::MackenzieError;
use mackenzie_core::proto::controller_server::Controller;
use mackenzie_core::proto::{
    AddNewTaskRequest, AddSetupRequest, CompletedTask, Empty, GetAllCompletedTasksResponse,
    GetAllSetupNamesResponse, GetSetupDirTarRequest, GetSetupDirTarResponse,
    GetSingleAvailableTaskRequest, GetSingleAvailableTaskResponse, SetTaskCompletedRequest,
    SetTaskFailedRequest, SetTaskProcessedRequest,
};
use mackenzie_core::setup_store::SetupStore;

use crate::task_store::TaskStore;

#[cfg(feature = "prometheus-metrics")]
use mackenzie_core::metrics::PrometheusMetricsCollector;

pub struct ControllerService {
    db: Db,
    setups: SetupStore,
    tasks: TaskStore,
    task_timeout: i64,
}

impl ControllerService {
    pub fn new(db: Db, setups: SetupStore, tasks: TaskStore, task_timeout: i64) -> Self {
        Self {
            db,
            setups,
            tasks,
            task_timeout,
        }
    }
}

fn json_to_status(e: MackenzieError) -> Status {
    e.into()
}

#[tonic::async_trait]
impl Controller for ControllerService {
    #[tracing::instrument(skip(self, request))]
    async fn add_setup(&self, request: Request<AddSetupRequest>) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        let setups = &self.setups;
        self.db
            .with_write_lock(|| setups.install(&req.name, &req.tar))
            .await
            .map_err(json_to_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn get_all_setup_names(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<GetAllSetupNamesResponse>, Status> {
        let names = self.setups.all_names().map_err(json_to_status)?;
        Ok(Response::new(GetAllSetupNamesResponse { names }))
    }

    async fn get_setup_dir_tar(
        &self,
        request: Request<GetSetupDirTarRequest>,
    ) -> Result<Response<GetSetupDirTarResponse>, Status> {
        let name = request.into_inner().name;
        let tar = self.setups.read_tar(&name).map_err(json_to_status)?;
        Ok(Response::new(GetSetupDirTarResponse { tar }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn get_single_available_task(
        &self,
        request: Request<GetSingleAvailableTaskRequest>,
    ) -> Result<Response<GetSingleAvailableTaskResponse>, Status> {
        let cluster = request.into_inner().cluster;
        let tasks = &self.tasks;
        let task_timeout = self.task_timeout;
        let found = self
            .db
            .with_write_lock(|| tasks.get_single_available_task(&cluster, task_timeout))
            .await
            .map_err(json_to_status)?;

        #[cfg(feature = "prometheus-metrics")]
        if let Ok((available, assigned)) = self.tasks.counts_by_state() {
            if let Ok(collector) = PrometheusMetricsCollector::current() {
                collector.set_pending_tasks(available);
                collector.set_assigned_tasks(assigned);
            }
        }

        Ok(Response::new(match found {
            None => GetSingleAvailableTaskResponse {
                present: false,
                id: String::new(),
                task_type: String::new(),
                data_json: String::new(),
                priority: 0,
            },
            Some(task) => GetSingleAvailableTaskResponse {
                present: true,
                id: task.id,
                task_type: task.task_type,
                data_json: task.data.to_string(),
                priority: task.priority,
            },
        }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn set_task_completed(
        &self,
        request: Request<SetTaskCompletedRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        let result: serde_json::Value =
            serde_json::from_str(&req.result_json).map_err(MackenzieError::from)?;
        let tasks = &self.tasks;
        self.db
            .with_write_lock(|| tasks.set_task_completed(&req.id, result))
            .await
            .map_err(json_to_status)?;

        #[cfg(feature = "prometheus-metrics")]
        if let Ok(collector) = PrometheusMetricsCollector::current() {
            collector.record_task_completed();
        }

        Ok(Response::new(Empty {}))
    }

    #[tracing::instrument(skip(self, request))]
    async fn set_task_failed(
        &self,
        request: Request<SetTaskFailedRequest>,
    ) -> Result<Response<Empty>, Status> {
        let id = request.into_inner().id;
        let tasks = &self.tasks;
        self.db
            .with_write_lock(|| tasks.set_task_failed(&id))
            .await
            .map_err(json_to_status)?;

        #[cfg(feature = "prometheus-metrics")]
        if let Ok(collector) = PrometheusMetricsCollector::current() {
            collector.record_task_failed();
        }

        Ok(Response::new(Empty {}))
    }

    #[tracing::instrument(skip(self, request))]
    async fn add_new_task(
        &self,
        request: Request<AddNewTaskRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        let data: serde_json::Value =
            serde_json::from_str(&req.data_json).map_err(MackenzieError::from)?;
        let tasks = &self.tasks;
        self.db
            .with_write_lock(|| tasks.add_new_task(&req.id, &req.task_type, data, req.priority))
            .await
            .map_err(json_to_status)?;

        #[cfg(feature = "prometheus-metrics")]
        if let Ok(collector) = PrometheusMetricsCollector::current() {
            collector.record_task_added();
        }

        Ok(Response::new(Empty {}))
    }

    async fn get_all_completed_tasks(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<GetAllCompletedTasksResponse>, Status> {
        let tasks = self.tasks.get_all_completed_tasks().map_err(json_to_status)?;
        Ok(Response::new(GetAllCompletedTasksResponse {
            tasks: tasks
                .into_iter()
                .map(|t| CompletedTask {
                    id: t.id,
                    task_type: t.task_type,
                    data_json: t.data.to_string(),
                    result_json: t.result.map(|r| r.to_string()).unwrap_or_default(),
                })
                .collect(),
        }))
    }

    async fn set_task_processed(
        &self,
        request: Request<SetTaskProcessedRequest>,
    ) -> Result<Response<Empty>, Status> {
        let id = request.into_inner().id;
        let tasks = &self.tasks;
        self.db
            .with_write_lock(|| tasks.set_task_processed(&id))
            .await
            .map_err(json_to_status)?;
        Ok(Response::new(Empty {}))
    }
}
