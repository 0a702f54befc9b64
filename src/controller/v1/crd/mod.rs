pub mod cluster_csi_driver;
