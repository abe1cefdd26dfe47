pub mod disk_space_manager;
